//! Credential and token data
//!
//! Plain data only. `expires_in` on [`OAuthTokens`] is the provider's TTL hint
//! (seconds delta); it is converted to an absolute [`StoredEntry::expires_at`]
//! at the moment the pair is written to a token store.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EXPIRY_SAFETY_MARGIN_SECS;
use crate::error::{Error, Result};

/// Identity-provider client registration used on behalf of a caller.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    #[serde(default)]
    pub caller_key: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl OAuthCredentials {
    pub fn new(
        caller_key: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            caller_key: caller_key.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Both halves of the client registration are present.
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Neither client id nor secret is set. Stores treat this like `None`.
    pub fn is_empty(&self) -> bool {
        self.client_id.is_empty() && self.client_secret.is_empty()
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("caller_key", &self.caller_key)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Access/refresh pair as returned by the token endpoint.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_in: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl OAuthTokens {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in,
        }
    }

    /// Absolute expiry for a pair written at `now`.
    ///
    /// `now + (expires_in - 30s)`. A TTL shorter than the margin yields an
    /// expiry in the past, so the pair is refreshed on first use. A TTL that
    /// does not fit a timestamp is a `Decode` error.
    pub fn expires_at_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.expires_in
            .checked_sub(EXPIRY_SAFETY_MARGIN_SECS)
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::Decode(format!("expires_in out of range: {}", self.expires_in)))
    }
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// What a token store holds for one caller key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub tokens: OAuthTokens,
    pub credentials: Option<OAuthCredentials>,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Lazy-expiry test used by every store: strictly past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
