//! Encrypted document-store token store
//!
//! Documents are `{caller_key, data, expires_at}` where `data` is the base64
//! of `Cipher::encrypt(json({tokens, credentials?}))`. Tokens and client
//! secrets never reach the collection in cleartext. `expires_at` stays in the
//! clear so expiry can be decided without decrypting.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::collection::{Document, DocumentCollection};
use super::{StoreFuture, TokenStore, provided_credentials};
use crate::cipher::Cipher;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{OAuthCredentials, OAuthTokens, StoredEntry};

/// Plaintext inside the encrypted blob.
#[derive(Debug, Serialize, Deserialize)]
struct SealedPayload {
    tokens: OAuthTokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<OAuthCredentials>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedDocument {
    #[serde(default)]
    caller_key: String,
    data: String,
    expires_at: DateTime<Utc>,
}

pub struct EncryptedDocumentTokenStore {
    collection: Arc<dyn DocumentCollection>,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
}

impl EncryptedDocumentTokenStore {
    pub fn new(collection: Arc<dyn DocumentCollection>, cipher: Arc<dyn Cipher>) -> Self {
        Self::with_clock(collection, cipher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        collection: Arc<dyn DocumentCollection>,
        cipher: Arc<dyn Cipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collection,
            cipher,
            clock,
        }
    }

    fn parse(caller_key: &str, doc: Document) -> Result<SealedDocument> {
        serde_json::from_value(serde_json::Value::Object(doc)).map_err(|e| {
            Error::Serialization(format!("sealed token document for {caller_key}: {e}"))
        })
    }

    fn open(&self, doc: &SealedDocument) -> Result<SealedPayload> {
        let blob = STANDARD
            .decode(&doc.data)
            .map_err(|e| Error::InvalidCiphertext(format!("data is not valid base64: {e}")))?;
        let raw = self.cipher.decrypt(&blob)?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Serialization(format!("decrypted token payload: {e}")))
    }

    /// Credentials currently sealed under `caller_key`, if any can be read.
    async fn existing_credentials(&self, caller_key: &str) -> Result<Option<OAuthCredentials>> {
        let Some(doc) = self.collection.find_one(caller_key).await? else {
            return Ok(None);
        };
        let sealed = match Self::parse(caller_key, doc).and_then(|d| self.open(&d)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(caller_key, error = %e, "existing sealed document unreadable, overwriting without credentials");
                return Ok(None);
            }
        };
        Ok(sealed.credentials)
    }
}

impl TokenStore for EncryptedDocumentTokenStore {
    fn load<'a>(&'a self, caller_key: &'a str) -> StoreFuture<'a, StoredEntry> {
        Box::pin(async move {
            let doc = self
                .collection
                .find_one(caller_key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("no tokens stored for {caller_key}")))?;
            let stored_expiry = doc.get("expires_at").cloned();
            let doc = Self::parse(caller_key, doc)?;

            if self.clock.now() > doc.expires_at {
                // Only the stale document; a pair saved since then survives
                if let Some(expiry) = stored_expiry {
                    self.collection
                        .delete_if_matches(caller_key, "expires_at", expiry)
                        .await?;
                }
                debug!(caller_key, "purged expired sealed document");
                return Err(Error::NotFound(format!("tokens for {caller_key} expired")));
            }

            let payload = self.open(&doc)?;
            Ok(StoredEntry {
                tokens: payload.tokens,
                credentials: payload.credentials,
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
            let credentials = match provided_credentials(credentials) {
                Some(c) => Some(c),
                None => self.existing_credentials(caller_key).await?,
            };

            let raw = serde_json::to_vec(&SealedPayload {
                tokens,
                credentials,
            })
            .map_err(|e| Error::Serialization(format!("sealing token payload: {e}")))?;
            let blob = self.cipher.encrypt(&raw)?;

            let doc = SealedDocument {
                caller_key: caller_key.to_string(),
                data: STANDARD.encode(blob),
                expires_at,
            };
            let fields = match serde_json::to_value(&doc) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => {
                    return Err(Error::Serialization(
                        "sealed document did not serialize to an object".into(),
                    ));
                }
            };

            self.collection.upsert(caller_key, fields).await?;
            debug!(caller_key, %expires_at, "stored sealed token document");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesGcmCipher, KEY_LEN};
    use crate::clock::ManualClock;
    use crate::store::sqlite::SqliteCollection;
    use crate::store::sqlite::tests::{RacingCollection, memory_pool};
    use chrono::Duration;

    struct Fixture {
        store: EncryptedDocumentTokenStore,
        collection: Arc<SqliteCollection>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let collection = Arc::new(SqliteCollection::new(memory_pool().await, "sealed"));
        let cipher = Arc::new(AesGcmCipher::new(&[3u8; KEY_LEN]).unwrap());
        let store = EncryptedDocumentTokenStore::with_clock(
            collection.clone(),
            cipher,
            clock.clone(),
        );
        Fixture {
            store,
            collection,
            clock,
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let f = fixture().await;
        let exp = f.clock.now() + Duration::seconds(30);
        let creds = OAuthCredentials::new("u1", "c", "s");

        f.store
            .save("u1", OAuthTokens::new("a1", "r1", 60), Some(creds.clone()), exp)
            .await
            .unwrap();

        let entry = f.store.load("u1").await.unwrap();
        assert_eq!(entry.tokens, OAuthTokens::new("a1", "r1", 60));
        assert_eq!(entry.credentials, Some(creds));
        assert_eq!(entry.expires_at, exp);
    }

    #[tokio::test]
    async fn document_holds_no_cleartext_secrets() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("at_visible", "rt_visible", 60),
                Some(OAuthCredentials::new("u1", "client-x", "secret-x")),
                f.clock.now() + Duration::seconds(30),
            )
            .await
            .unwrap();

        let doc = f.collection.find_one("u1").await.unwrap().unwrap();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 3, "got fields {keys:?}");
        assert!(doc.contains_key("caller_key"));
        assert!(doc.contains_key("data"));
        assert!(doc.contains_key("expires_at"));

        let raw = serde_json::to_string(&doc).unwrap();
        for secret in ["at_visible", "rt_visible", "client-x", "secret-x"] {
            assert!(!raw.contains(secret), "{secret} leaked into {raw}");
        }
    }

    #[tokio::test]
    async fn refresh_without_credentials_preserves_them() {
        let f = fixture().await;
        let exp = f.clock.now() + Duration::seconds(300);
        let creds = OAuthCredentials::new("u1", "c", "s");

        f.store
            .save("u1", OAuthTokens::new("a1", "r1", 60), Some(creds.clone()), exp)
            .await
            .unwrap();
        f.store
            .save("u1", OAuthTokens::new("a2", "r2", 60), None, exp)
            .await
            .unwrap();

        let entry = f.store.load("u1").await.unwrap();
        assert_eq!(entry.tokens.access_token, "a2");
        assert_eq!(entry.credentials, Some(creds));
    }

    #[tokio::test]
    async fn tampered_blob_fails_authentication() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 60),
                None,
                f.clock.now() + Duration::seconds(30),
            )
            .await
            .unwrap();

        let doc = f.collection.find_one("u1").await.unwrap().unwrap();
        let mut blob = STANDARD.decode(doc["data"].as_str().unwrap()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let mut patch = Document::new();
        patch.insert("data".into(), STANDARD.encode(blob).into());
        f.collection.upsert("u1", patch).await.unwrap();

        let err = f.store.load("u1").await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailure), "got {err:?}");
    }

    #[tokio::test]
    async fn truncated_blob_is_invalid_ciphertext() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 60),
                None,
                f.clock.now() + Duration::seconds(30),
            )
            .await
            .unwrap();

        let mut patch = Document::new();
        patch.insert("data".into(), STANDARD.encode([1u8, 2, 3]).into());
        f.collection.upsert("u1", patch).await.unwrap();

        let err = f.store.load("u1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCiphertext(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn wrong_key_cannot_read_documents() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 60),
                None,
                f.clock.now() + Duration::seconds(30),
            )
            .await
            .unwrap();

        let other = EncryptedDocumentTokenStore::with_clock(
            f.collection.clone(),
            Arc::new(AesGcmCipher::new(&[4u8; KEY_LEN]).unwrap()),
            f.clock.clone(),
        );
        assert!(matches!(
            other.load("u1").await,
            Err(Error::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn expired_document_is_not_found_and_deleted() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 90),
                None,
                f.clock.now() + Duration::seconds(60),
            )
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(61));
        assert!(f.store.load("u1").await.unwrap_err().is_not_found());
        assert!(f.collection.find_one("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_keeps_pair_saved_after_the_read() {
        let f = fixture().await;
        f.store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 0),
                None,
                f.clock.now() + Duration::seconds(60),
            )
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(61));

        let cipher = Arc::new(AesGcmCipher::new(&[3u8; KEY_LEN]).unwrap());
        let scratch = Arc::new(SqliteCollection::new(memory_pool().await, "scratch"));
        EncryptedDocumentTokenStore::with_clock(scratch.clone(), cipher.clone(), f.clock.clone())
            .save(
                "u1",
                OAuthTokens::new("a2", "r2", 0),
                None,
                f.clock.now() + Duration::seconds(900),
            )
            .await
            .unwrap();
        let fresh = scratch.find_one("u1").await.unwrap().unwrap();

        let racing = Arc::new(RacingCollection::new(f.collection.clone(), fresh));
        let store = EncryptedDocumentTokenStore::with_clock(racing, cipher, f.clock.clone());

        assert!(store.load("u1").await.unwrap_err().is_not_found());
        let entry = store.load("u1").await.unwrap();
        assert_eq!(entry.tokens.access_token, "a2");
    }
}
