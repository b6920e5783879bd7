// src/store/mod.rs
//! Access to the primary `activities` table. The pipeline only reads records
//! and writes the `related_ids` annotation; it never creates or deletes rows.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::activity::{Activity, ActivityId};

pub use memory::MemoryRecordStore;
pub use postgres::{ensure_schema, PgRecordStore};

/// Primary record store handle, passed into each component for one run.
///
/// Implementations are not expected to isolate a run from concurrent CRUD
/// writes: the relation step reads then writes without a transaction, so the
/// store must be quiescent while the job runs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every activity, ascending by id.
    async fn list_activities(&self) -> Result<Vec<Activity>>;

    async fn get_activity(&self, id: ActivityId) -> Result<Option<Activity>>;

    /// Sets (or clears, with `None`) the `related_ids` column of one activity.
    async fn update_relation(&self, id: ActivityId, related_ids: Option<&str>) -> Result<()>;
}
