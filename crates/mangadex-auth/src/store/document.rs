//! Plaintext document-store token store
//!
//! One document per caller key:
//! `{caller_key, access_token, refresh_token, expires_at, client_id?, client_secret?}`.
//! Client credentials are only written when provided; the collection's merge
//! semantics keep earlier ones otherwise.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::collection::{Document, DocumentCollection};
use super::{StoreFuture, TokenStore, provided_credentials};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{OAuthCredentials, OAuthTokens, StoredEntry};

#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    #[serde(default)]
    caller_key: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

pub struct DocumentTokenStore {
    collection: Arc<dyn DocumentCollection>,
    clock: Arc<dyn Clock>,
}

impl DocumentTokenStore {
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self::with_clock(collection, Arc::new(SystemClock))
    }

    pub fn with_clock(collection: Arc<dyn DocumentCollection>, clock: Arc<dyn Clock>) -> Self {
        Self { collection, clock }
    }
}

fn into_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Serialization(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(Error::Serialization(e.to_string())),
    }
}

impl TokenStore for DocumentTokenStore {
    fn load<'a>(&'a self, caller_key: &'a str) -> StoreFuture<'a, StoredEntry> {
        Box::pin(async move {
            let doc = self
                .collection
                .find_one(caller_key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("no tokens stored for {caller_key}")))?;

            let stored_expiry = doc.get("expires_at").cloned();
            let doc: TokenDocument = serde_json::from_value(serde_json::Value::Object(doc))
                .map_err(|e| {
                    Error::Serialization(format!("token document for {caller_key}: {e}"))
                })?;

            if self.clock.now() > doc.expires_at {
                // Only the stale document; a pair saved since then survives
                if let Some(expiry) = stored_expiry {
                    self.collection
                        .delete_if_matches(caller_key, "expires_at", expiry)
                        .await?;
                }
                debug!(caller_key, "purged expired token document");
                return Err(Error::NotFound(format!("tokens for {caller_key} expired")));
            }

            let credentials = (!doc.client_id.is_empty() && !doc.client_secret.is_empty())
                .then(|| OAuthCredentials::new(caller_key, doc.client_id, doc.client_secret));

            Ok(StoredEntry {
                tokens: OAuthTokens::new(doc.access_token, doc.refresh_token, 0),
                credentials,
                expires_at: doc.expires_at,
            })
        })
    }

    fn save<'a>(
        &'a self,
        caller_key: &'a str,
        tokens: OAuthTokens,
        credentials: Option<OAuthCredentials>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let credentials = provided_credentials(credentials);
            let has_credentials = credentials.is_some();
            let (client_id, client_secret) = credentials
                .map(|c| (c.client_id, c.client_secret))
                .unwrap_or_default();

            let mut fields = into_document(&TokenDocument {
                caller_key: caller_key.to_string(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at,
                client_id,
                client_secret,
            })?;

            // Leave stored credentials untouched when none were provided
            if !has_credentials {
                fields.remove("client_id");
                fields.remove("client_secret");
            }

            self.collection.upsert(caller_key, fields).await?;
            debug!(caller_key, %expires_at, "stored token document");
            Ok(())
        })
    }
}
