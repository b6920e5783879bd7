// src/embedding/vector_store.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::activity::{ActivityField, ActivityId};
use crate::utils::db_connect::PgPool;

/// One persisted cache entry, keyed by (activity id, field).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub model_id: String,
    /// Signature of the normalized text the vector was computed from.
    pub text_signature: String,
    pub blob: Vec<u8>,
}

/// Durable backing for the vector cache.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn load(&self, activity_id: ActivityId, field: ActivityField) -> Result<Option<StoredVector>>;

    /// Inserts or overwrites the entry for (activity_id, field).
    async fn save(&self, activity_id: ActivityId, field: ActivityField, entry: &StoredVector) -> Result<()>;
}

/// Vectors persisted in the `activity_embeddings` table.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn load(&self, activity_id: ActivityId, field: ActivityField) -> Result<Option<StoredVector>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for vector cache load")?;
        let row_opt = conn
            .query_opt(
                "SELECT model_id, text_signature, vector
                 FROM activity_embeddings
                 WHERE activity_id = $1 AND field = $2",
                &[&activity_id, &field.as_str()],
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to load cached {} vector for activity {}",
                    field, activity_id
                )
            })?;

        Ok(row_opt.map(|row| StoredVector {
            model_id: row.get("model_id"),
            text_signature: row.get("text_signature"),
            blob: row.get("vector"),
        }))
    }

    async fn save(&self, activity_id: ActivityId, field: ActivityField, entry: &StoredVector) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for vector cache save")?;
        conn.execute(
            "INSERT INTO activity_embeddings (activity_id, field, model_id, text_signature, vector, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (activity_id, field) DO UPDATE SET
                model_id = EXCLUDED.model_id,
                text_signature = EXCLUDED.text_signature,
                vector = EXCLUDED.vector,
                updated_at = NOW()",
            &[
                &activity_id,
                &field.as_str(),
                &entry.model_id,
                &entry.text_signature,
                &entry.blob,
            ],
        )
        .await
        .with_context(|| {
            format!(
                "Failed to store {} vector for activity {}",
                field, activity_id
            )
        })?;
        debug!("Stored {} vector for activity {}", field, activity_id);
        Ok(())
    }
}

/// Process-local store, used by tests and dry runs without a database.
#[derive(Default)]
pub struct MemoryVectorStore {
    entries: Mutex<HashMap<(ActivityId, ActivityField), StoredVector>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Overwrites the raw blob of an entry, leaving its signature intact.
    pub async fn overwrite_blob(&self, activity_id: ActivityId, field: ActivityField, blob: Vec<u8>) {
        if let Some(entry) = self.entries.lock().await.get_mut(&(activity_id, field)) {
            entry.blob = blob;
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn load(&self, activity_id: ActivityId, field: ActivityField) -> Result<Option<StoredVector>> {
        Ok(self.entries.lock().await.get(&(activity_id, field)).cloned())
    }

    async fn save(&self, activity_id: ActivityId, field: ActivityField, entry: &StoredVector) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert((activity_id, field), entry.clone());
        Ok(())
    }
}
