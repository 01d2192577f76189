//! Error types for credential lifecycle operations

/// Errors from login, refresh, token storage, and token encryption.
///
/// Nothing in this workspace retries on any of these; they propagate to the
/// caller of the failing operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token request failed: {0}")]
    AuthRequestFailed(String),

    #[error("invalid token response: {0}")]
    Decode(String),

    #[error("no access token for {0}")]
    MissingAccessToken(String),

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("ciphertext failed authentication")]
    AuthenticationFailure,

    #[error("token store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this is the lazy-expiry / missing-entry case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
