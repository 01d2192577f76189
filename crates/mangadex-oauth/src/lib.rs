//! Request-time OAuth lifecycle for the MangaDex API
//!
//! Built on `mangadex-auth`. The client owns no token state; every decision
//! reads the injected token store.
//!
//! Request flow:
//! 1. Caller logs in once via `OAuthClient::login()`; the pair is stored
//! 2. `OAuthClient::apply_auth(caller_key)` returns an `AuthDecorator`
//! 3. `AuthDecorator::apply()` skips requests for other hosts
//! 4. For API requests it loads the pair and refreshes it inline when due
//! 5. `Authorization: Bearer <token>` is set on the request

pub mod client;
pub mod decorate;
pub mod metrics;

pub use client::{OAuthClient, OAuthClientBuilder, PersistPolicy, RefreshMode, TokenGrant};
pub use decorate::{AuthDecorator, AuthTarget, AuthorizedTransport, host_matches};
