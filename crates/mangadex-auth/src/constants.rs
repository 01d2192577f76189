//! MangaDex OAuth constants
//!
//! The identity provider is MangaDex's Keycloak realm. Both grants (password
//! and refresh_token) POST to the same token endpoint. Bearer tokens are only
//! ever attached to requests for the API host.

/// Token endpoint for the password and refresh_token grants
pub const TOKEN_ENDPOINT: &str =
    "https://auth.mangadex.org/realms/mangadex/protocol/openid-connect/token";

/// Host of the protected API. Requests to any other host are left untouched.
pub const API_HOST: &str = "api.mangadex.org";

/// Seconds subtracted from `expires_in` when computing the stored expiry, so a
/// token is treated as expired slightly before the provider invalidates it.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 30;

/// Per-request timeout for token endpoint calls when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
