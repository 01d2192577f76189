//! SQLite-backed document collection
//!
//! Documents live as JSON text in one table shared by named collections.
//! `upsert` is a single `INSERT .. ON CONFLICT DO UPDATE` that merges with
//! `json_patch`, so the field merge is atomic in the database and needs no
//! application-level lock. Nothing coordinates across processes beyond that.

use sqlx::SqlitePool;
use tracing::debug;

use super::StoreFuture;
use super::collection::{Document, DocumentCollection};
use crate::error::{Error, Result};

pub struct SqliteCollection {
    pool: SqlitePool,
    collection: String,
}

impl SqliteCollection {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    /// Create the documents table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS token_documents (
                collection TEXT NOT NULL,
                key        TEXT NOT NULL,
                doc        TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )"#,
        )
        .execute(pool)
        .await
        .map_err(|e| Error::Store(format!("creating token_documents table: {e}")))?;
        Ok(())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl DocumentCollection for SqliteCollection {
    fn find_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            let row: Option<String> = sqlx::query_scalar(
                "SELECT doc FROM token_documents WHERE collection = ? AND key = ?",
            )
            .bind(&self.collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("reading document {key}: {e}")))?;

            row.map(|doc| {
                serde_json::from_str::<Document>(&doc)
                    .map_err(|e| Error::Serialization(format!("parsing document {key}: {e}")))
            })
            .transpose()
        })
    }

    fn upsert<'a>(&'a self, key: &'a str, fields: Document) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let doc = serde_json::to_string(&fields)
                .map_err(|e| Error::Serialization(format!("serializing document {key}: {e}")))?;

            sqlx::query(
                r#"INSERT INTO token_documents (collection, key, doc) VALUES (?, ?, ?)
                   ON CONFLICT(collection, key)
                   DO UPDATE SET doc = json_patch(token_documents.doc, excluded.doc)"#,
            )
            .bind(&self.collection)
            .bind(key)
            .bind(&doc)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("upserting document {key}: {e}")))?;

            debug!(collection = %self.collection, key, "upserted document");
            Ok(())
        })
    }

    fn delete_one<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM token_documents WHERE collection = ? AND key = ?")
                .bind(&self.collection)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Store(format!("deleting document {key}: {e}")))?;
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
            let expected = serde_json::to_string(&expected)
                .map_err(|e| Error::Serialization(format!("serializing match value: {e}")))?;

            // Compare and delete in one statement so a concurrent upsert wins
            let result = sqlx::query(
                r#"DELETE FROM token_documents
                   WHERE collection = ? AND key = ?
                     AND json_extract(doc, '$.' || ?) = json_extract(?, '$')"#,
            )
            .bind(&self.collection)
            .bind(key)
            .bind(field)
            .bind(&expected)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("deleting document {key}: {e}")))?;

            let removed = result.rows_affected() > 0;
            if removed {
                debug!(collection = %self.collection, key, field, "deleted matching document");
            }
            Ok(removed)
        })
    }
}
