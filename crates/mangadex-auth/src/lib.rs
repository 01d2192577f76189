//! MangaDex OAuth token primitives
//!
//! Data types, the token endpoint client, token persistence and the
//! at-rest cipher used by the encrypted document store. The request-time
//! lifecycle (refresh on expiry, Bearer decoration) lives in `mangadex-oauth`
//! on top of this crate.
//!
//! Token flow:
//! 1. `token::TokenEndpoint::password_grant()` logs a caller in
//! 2. The pair is written through a `store::TokenStore` with an absolute expiry
//! 3. `TokenStore::load()` serves it until `now > expires_at`
//! 4. `token::TokenEndpoint::refresh_grant()` replaces it, credentials kept

pub mod cipher;
pub mod clock;
pub mod constants;
pub mod error;
pub mod model;
pub mod store;
pub mod token;

pub use cipher::{AesGcmCipher, Cipher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use error::{Error, Result};
pub use model::{OAuthCredentials, OAuthTokens, StoredEntry};
pub use store::{
    Document, DocumentCollection, DocumentTokenStore, EncryptedDocumentTokenStore, FileCollection,
    MemoryTokenStore, SqliteCollection, StoreFuture, TokenStore,
};
pub use token::{Grant, TokenEndpoint};
