// src/utils/instantiate_run.rs
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;

use crate::models::stats_models::PipelineStats;
use crate::utils::db_connect::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
        }
    }
}

/// Inserts the `dedupe_runs` row before any work starts, so a crashed run is
/// still visible as `running` rather than absent.
pub async fn create_initial_dedupe_run(
    pool: &PgPool,
    run_id: &str,
    run_timestamp: NaiveDateTime,
    description: Option<&str>,
) -> Result<PipelineStats> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for create_initial_dedupe_run")?;

    const INSERT_SQL: &str = "
        INSERT INTO dedupe_runs (
            id, run_timestamp, description, status,
            total_records, pairs_found, relations_written, processing_time
        )
        VALUES ($1, $2, $3, $4, 0, 0, 0, 0.0)
    ";

    conn.execute(
        INSERT_SQL,
        &[
            &run_id,
            &run_timestamp,
            &description,
            &RunStatus::Running.as_str(),
        ],
    )
    .await
    .context("Failed to insert initial dedupe_runs record")?;

    info!("Created initial dedupe_runs record with ID: {}", run_id);

    Ok(PipelineStats {
        run_id: run_id.to_string(),
        ..Default::default()
    })
}

/// Records the final status. `stats` is stored as the JSON summary.
pub async fn finalize_dedupe_run(
    pool: &PgPool,
    run_id: &str,
    status: RunStatus,
    stats: &PipelineStats,
    error_message: Option<&str>,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for finalize_dedupe_run")?;

    let summary = serde_json::to_value(stats).context("Failed to serialize run summary")?;
    let relations_written = stats
        .relations
        .as_ref()
        .map(|r| r.relations_written)
        .unwrap_or(0) as i64;

    const UPDATE_SQL: &str = "
        UPDATE dedupe_runs
        SET status = $2,
            total_records = $3,
            pairs_found = $4,
            relations_written = $5,
            processing_time = $6,
            error_message = $7,
            summary = $8
        WHERE id = $1
    ";

    conn.execute(
        UPDATE_SQL,
        &[
            &run_id,
            &status.as_str(),
            &(stats.total_records as i64),
            &(stats.pairs_found as i64),
            &relations_written,
            &stats.total_processing_time,
            &error_message,
            &summary,
        ],
    )
    .await
    .context("Failed to finalize dedupe_runs record")?;

    info!("Marked dedupe run {} as {}", run_id, status.as_str());
    Ok(())
}
