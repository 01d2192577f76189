//! Token persistence
//!
//! One [`StoredEntry`] per caller key, last write wins. Every back end
//! implements the same two-operation [`TokenStore`] contract:
//!
//! - `load` returns `NotFound` when no live entry exists. An entry strictly
//!   past its `expires_at` is not live; the back end purges it on the way out,
//!   unless a newer pair replaced it since it was read.
//! - `save` upserts. When `credentials` is `None` (or carries neither client id
//!   nor secret) any previously stored credentials are kept, so a refresh
//!   never erases the caller's client registration.
//!
//! Back ends are chosen at startup and handed around as `Arc<dyn TokenStore>`.

pub mod collection;
pub mod document;
pub mod encrypted;
pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{OAuthCredentials, OAuthTokens, StoredEntry};

pub use collection::{Document, DocumentCollection, FileCollection};
pub use document::DocumentTokenStore;
pub use encrypted::EncryptedDocumentTokenStore;
pub use memory::MemoryTokenStore;
pub use sqlite::SqliteCollection;

/// Boxed future returned by store and collection methods.
///
/// `Pin<Box<dyn Future>>` keeps the traits dyn-compatible (`Arc<dyn TokenStore>`).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage of `(tokens, credentials, expiry)` keyed by caller.
pub trait TokenStore: Send + Sync {
    /// Live entry for `caller_key`, or `Error::NotFound`.
    fn load<'a>(&'a self, caller_key: &'a str) -> StoreFuture<'a, StoredEntry>;

    /// Upsert the entry for `caller_key`.
    fn save<'a>(
        &'a self,
        caller_key: &'a str,
        tokens: OAuthTokens,
        credentials: Option<OAuthCredentials>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;
}

/// Drop credentials that carry nothing worth storing.
pub(crate) fn provided_credentials(
    credentials: Option<OAuthCredentials>,
) -> Option<OAuthCredentials> {
    credentials.filter(|c| !c.is_empty())
}
