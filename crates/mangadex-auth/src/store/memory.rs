//! Volatile token store
//!
//! A map behind a single tokio Mutex. Reads take the same exclusive lock as
//! writes because `load` purges expired entries. Entries are cloned in and out
//! so no caller can mutate another caller's view of stored credentials.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{StoreFuture, TokenStore, provided_credentials};
use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::model::{OAuthCredentials, OAuthTokens, StoredEntry};

pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of physically present entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load<'a>(&'a self, caller_key: &'a str) -> StoreFuture<'a, StoredEntry> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .get(caller_key)
                .ok_or_else(|| Error::NotFound(format!("no tokens stored for {caller_key}")))?;

            if entry.is_expired_at(self.clock.now()) {
                entries.remove(caller_key);
                debug!(caller_key, "purged expired token entry");
                return Err(Error::NotFound(format!("tokens for {caller_key} expired")));
            }

            Ok(entry.clone())
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
            let mut entries = self.entries.lock().await;
            let credentials = provided_credentials(credentials).or_else(|| {
                entries
                    .get(caller_key)
                    .and_then(|existing| existing.credentials.clone())
            });
            entries.insert(
                caller_key.to_string(),
                StoredEntry {
                    tokens,
                    credentials,
                    expires_at,
                },
            );
            debug!(caller_key, %expires_at, "stored tokens");
            Ok(())
        })
    }
}
