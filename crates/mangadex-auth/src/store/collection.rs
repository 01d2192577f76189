//! Document collections backing the document-store token stores
//!
//! A collection holds JSON object documents keyed by string. `upsert` has
//! MongoDB `$set` semantics: create the document if absent, otherwise merge
//! the given top-level fields into it and leave the other fields alone. The
//! token stores rely on that merge to keep stored client credentials across
//! refreshes.
//!
//! [`FileCollection`] keeps the whole collection in one JSON file. All writes
//! use atomic temp-file + rename; a tokio Mutex serializes read-modify-write
//! cycles within the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::StoreFuture;
use crate::error::{Error, Result};

/// A JSON object document.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub trait DocumentCollection: Send + Sync {
    fn find_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Document>>;

    /// Create or merge `fields` into the document stored under `key`.
    fn upsert<'a>(&'a self, key: &'a str, fields: Document) -> StoreFuture<'a, ()>;

    /// Remove the document under `key`. Absent keys are not an error.
    fn delete_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// Remove the document under `key` only while its `field` still equals
    /// `expected`. Returns whether a document was removed.
    fn delete_if_matches<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        expected: serde_json::Value,
    ) -> StoreFuture<'a, bool>;
}

/// Merge `fields` into `doc`, overwriting fields present in both.
pub(crate) fn merge_fields(doc: &mut Document, fields: Document) {
    for (name, value) in fields {
        doc.insert(name, value);
    }
}

/// Collection persisted as a single JSON file of `{key: document}`.
pub struct FileCollection {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Document>>,
}

impl FileCollection {
    /// Open the collection file, creating it as `{}` if it doesn't exist.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading collection file: {e}")))?;
            let documents: BTreeMap<String, Document> = serde_json::from_str(&contents)
                .map_err(|e| Error::Serialization(format!("parsing collection file: {e}")))?;
            info!(path = %path.display(), documents = documents.len(), "opened token collection");
            documents
        } else {
            info!(path = %path.display(), "collection file not found, starting empty");
            let documents = BTreeMap::new();
            write_atomic(&path, &documents).await?;
            documents
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl DocumentCollection for FileCollection {
    fn find_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(key).cloned())
        })
    }

    fn upsert<'a>(&'a self, key: &'a str, fields: Document) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            // Memory only changes once the file does
            let mut next = state.clone();
            merge_fields(next.entry(key.to_string()).or_default(), fields);
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(key, "upserted document");
            Ok(())
        })
    }

    fn delete_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.contains_key(key) {
                let mut next = state.clone();
                next.remove(key);
                write_atomic(&self.path, &next).await?;
                *state = next;
                debug!(key, "deleted document");
            }
            Ok(())
        })
    }

    fn delete_if_matches<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        expected: serde_json::Value,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let matches = state
                .get(key)
                .is_some_and(|doc| doc.get(field) == Some(&expected));
            if !matches {
                return Ok(false);
            }
            let mut next = state.clone();
            next.remove(key);
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(key, field, "deleted matching document");
            Ok(true)
        })
    }
}

/// Write the collection to its file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since documents hold OAuth tokens.
async fn write_atomic(path: &Path, data: &BTreeMap<String, Document>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Serialization(format!("serializing collection: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("collection path has no parent directory".into()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tokens".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp collection file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting collection file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp collection file: {e}")))?;

    debug!(path = %path.display(), "persisted collection");
    Ok(())
}
