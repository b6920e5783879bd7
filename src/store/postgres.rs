// src/store/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio_postgres::Row;

use crate::models::activity::{Activity, ActivityId};
use crate::store::RecordStore;
use crate::utils::db_connect::PgPool;

const ACTIVITY_COLUMNS: &str =
    "id::BIGINT AS id, title, type, description, supplies, instructions, related_ids";

/// Creates the cache and run-log tables and the `related_ids` column if they
/// are missing. Safe to call at the start of every run.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for ensure_schema")?;

    conn.batch_execute(
        "
        ALTER TABLE activities ADD COLUMN IF NOT EXISTS related_ids TEXT;

        CREATE TABLE IF NOT EXISTS activity_embeddings (
            activity_id BIGINT NOT NULL,
            field TEXT NOT NULL,
            model_id TEXT NOT NULL,
            text_signature TEXT NOT NULL,
            vector BYTEA NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (activity_id, field)
        );

        CREATE TABLE IF NOT EXISTS dedupe_runs (
            id TEXT PRIMARY KEY,
            run_timestamp TIMESTAMP NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            total_records BIGINT NOT NULL DEFAULT 0,
            pairs_found BIGINT NOT NULL DEFAULT 0,
            relations_written BIGINT NOT NULL DEFAULT 0,
            processing_time DOUBLE PRECISION NOT NULL DEFAULT 0,
            error_message TEXT,
            summary JSONB
        );
        ",
    )
    .await
    .context("Failed to ensure duplicate detection schema")?;

    info!("Schema for duplicate detection is in place");
    Ok(())
}

fn activity_from_row(row: &Row) -> Activity {
    Activity {
        id: row.get("id"),
        title: row.get("title"),
        activity_type: row.get("type"),
        description: row.get("description"),
        supplies: row.get("supplies"),
        instructions: row.get("instructions"),
        related_ids: row.get("related_ids"),
    }
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn list_activities(&self) -> Result<Vec<Activity>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_activities")?;
        let query = format!("SELECT {} FROM activities ORDER BY id", ACTIVITY_COLUMNS);
        let rows = conn
            .query(query.as_str(), &[])
            .await
            .context("Failed to query activities")?;
        debug!("Loaded {} activity rows", rows.len());
        Ok(rows.iter().map(activity_from_row).collect())
    }

    async fn get_activity(&self, id: ActivityId) -> Result<Option<Activity>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for get_activity")?;
        let query = format!(
            "SELECT {} FROM activities WHERE id = $1::BIGINT",
            ACTIVITY_COLUMNS
        );
        let row_opt = conn
            .query_opt(query.as_str(), &[&id])
            .await
            .with_context(|| format!("Failed to load activity {}", id))?;
        Ok(row_opt.as_ref().map(activity_from_row))
    }

    async fn update_relation(&self, id: ActivityId, related_ids: Option<&str>) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for update_relation")?;
        let updated = conn
            .execute(
                "UPDATE activities SET related_ids = $2 WHERE id = $1::BIGINT",
                &[&id, &related_ids],
            )
            .await
            .with_context(|| format!("Failed to update related_ids for activity {}", id))?;
        debug!("Updated related_ids for activity {} ({} row)", id, updated);
        Ok(())
    }
}
