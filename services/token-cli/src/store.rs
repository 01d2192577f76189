//! Token store selection
//!
//! The only place that knows concrete store types. Everything downstream
//! sees `Arc<dyn TokenStore>`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use mangadex_auth::{
    AesGcmCipher, DocumentCollection, DocumentTokenStore, EncryptedDocumentTokenStore,
    FileCollection, MemoryTokenStore, SqliteCollection, TokenStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};

pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn TokenStore>> {
    let collection: Arc<dyn DocumentCollection> = match config.backend {
        StoreBackend::Memory => {
            info!(backend = "memory", "token store ready");
            return Ok(Arc::new(MemoryTokenStore::new()));
        }
        StoreBackend::File => {
            let path = require_path(config)?;
            Arc::new(
                FileCollection::open(path.to_path_buf())
                    .await
                    .with_context(|| format!("opening token file {}", path.display()))?,
            )
        }
        StoreBackend::Sqlite => {
            let path = require_path(config)?;
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .with_context(|| format!("opening token database {}", path.display()))?;
            SqliteCollection::init(&pool).await?;
            Arc::new(SqliteCollection::new(pool, config.collection.clone()))
        }
    };

    let store: Arc<dyn TokenStore> = if config.encrypted {
        let key = config
            .key
            .as_ref()
            .context("encrypted store configured without a key")?;
        let cipher = AesGcmCipher::from_base64(key.expose())?;
        Arc::new(EncryptedDocumentTokenStore::new(collection, Arc::new(cipher)))
    } else {
        Arc::new(DocumentTokenStore::new(collection))
    };

    info!(
        backend = ?config.backend,
        collection = %config.collection,
        encrypted = config.encrypted,
        "token store ready"
    );
    Ok(store)
}

fn require_path(config: &StoreConfig) -> Result<&Path> {
    config
        .path
        .as_deref()
        .with_context(|| format!("store.path is required for the {:?} back end", config.backend))
}
