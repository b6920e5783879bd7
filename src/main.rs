// src/main.rs
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use dedupe_lib::embedding::PgVectorStore;
use dedupe_lib::error::DedupeError;
use dedupe_lib::models::stats_models::PipelineStats;
use dedupe_lib::pipeline::{build_vector_cache, run_duplicate_pipeline, RunOptions};
use dedupe_lib::store::{ensure_schema, PgRecordStore};
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::dedupe_config::{parse_compared_fields, DedupeConfig};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::get_memory_usage;
use dedupe_lib::utils::instantiate_run::{
    create_initial_dedupe_run, finalize_dedupe_run, RunStatus,
};
use dedupe_lib::utils::progress_config::ProgressConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Find near-duplicate activities by embedding similarity", long_about = None)]
struct Args {
    /// Inclusive cosine similarity threshold, in (0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Number of id1 rows compared per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Comma separated fields to compare (title, description, supplies, instructions)
    #[arg(long)]
    fields: Option<String>,

    /// Directory for potential_duplicates.txt / .csv
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Write reports but do not touch related_ids
    #[arg(long)]
    dry_run: bool,

    /// Stop after writing the reports
    #[arg(long)]
    skip_relations: bool,

    /// Clear related_ids on records that no longer have any pair
    #[arg(long)]
    clear_stale_relations: bool,

    /// Free-text note stored with the run
    #[arg(long)]
    description: Option<String>,
}

fn apply_args(config: &mut DedupeConfig, args: &Args) -> Result<()> {
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(fields) = &args.fields {
        config.compared_fields = parse_compared_fields(fields)?;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if args.clear_stale_relations {
        config.clear_stale_relations = true;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting activity duplicate detection");
    load_env();
    let args = Args::parse();

    let mut config = DedupeConfig::from_env().context("Failed to read configuration")?;
    apply_args(&mut config, &args)?;
    config.validate()?;
    config.log_config();

    let progress_config = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}",
        progress_config.enabled, progress_config.detailed
    );
    let multi_progress = progress_config.create_multi_progress();
    let detail_progress = if progress_config.should_show_detailed() {
        multi_progress.as_ref()
    } else {
        None
    };

    let run_id = Uuid::new_v4().to_string();
    let pool = connect(&format!("activity_dedupe/{}", run_id))
        .await
        .context("Failed to connect to database")?;
    info!("Successfully connected to the database");
    ensure_schema(&pool).await?;

    // Built before the run row so a bad key never leaves a run in `running`.
    let mut cache = build_vector_cache(&config, Arc::new(PgVectorStore::new(pool.clone())))?;
    let record_store = PgRecordStore::new(pool.clone());

    let run_timestamp = Utc::now().naive_utc();
    let description = args.description.clone().unwrap_or_else(|| {
        format!(
            "Duplicate detection on [{}] at threshold {}{}",
            config.compared_fields_label(),
            config.similarity_threshold,
            if args.dry_run { " (dry run)" } else { "" }
        )
    });
    create_initial_dedupe_run(&pool, &run_id, run_timestamp, Some(&description))
        .await
        .context("Failed to create initial dedupe run")?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = stop_flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 Interrupt received; stopping at the next checkpoint");
                stop_flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let options = RunOptions {
        run_id: run_id.clone(),
        dry_run: args.dry_run,
        skip_relations: args.skip_relations,
    };
    let start = Instant::now();
    let result = run_duplicate_pipeline(
        &record_store,
        &mut cache,
        &config,
        &options,
        Some(stop_flag.as_ref()),
        detail_progress,
    )
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let status = match e.downcast_ref::<DedupeError>() {
                Some(DedupeError::Interrupted { .. }) => RunStatus::Interrupted,
                _ => RunStatus::Failed,
            };
            let stats = PipelineStats {
                run_id: run_id.clone(),
                total_processing_time: start.elapsed().as_secs_f64(),
                ..Default::default()
            };
            let message = format!("{:#}", e);
            error!("Duplicate detection {}: {}", status.as_str(), message);
            if let Err(finalize_err) =
                finalize_dedupe_run(&pool, &run_id, status, &stats, Some(&message)).await
            {
                error!("Could not record run outcome: {:#}", finalize_err);
            }
            return Err(e);
        }
    };

    finalize_dedupe_run(&pool, &run_id, RunStatus::Completed, &outcome.stats, None)
        .await
        .context("Failed to finalize dedupe run")?;

    let stats = &outcome.stats;
    info!("=== Duplicate Detection Summary ===");
    info!("Run ID: {}", run_id);
    info!("Activities: {}", stats.total_records);
    info!("{}", outcome.report.summary_line());
    info!("Text report: {}", outcome.report_paths.text.display());
    info!("Tabular report: {}", outcome.report_paths.tabular.display());
    if let Some(relations) = &stats.relations {
        info!(
            "Relations: {} written, {} unchanged, {} cleared, {} dropped{}",
            relations.relations_written,
            relations.relations_unchanged,
            relations.relations_cleared,
            relations.pairs_dropped_missing,
            if relations.dry_run { " (dry run)" } else { "" }
        );
    }
    info!("=== Timing Breakdown ===");
    info!("Vector preparation: {:.2}s", stats.vectors.processing_time);
    info!("Pairwise comparison: {:.2}s", stats.engine.processing_time);
    info!("Total execution time: {:.2}s", stats.total_processing_time);

    if progress_config.should_show_cache_stats() {
        let cache_stats = cache.stats();
        info!(
            "Vector cache: {} memory hit(s), {} store hit(s), {} miss(es), {} stale, {} corrupt recomputed",
            cache_stats.memory_hits,
            cache_stats.store_hits,
            cache_stats.misses,
            cache_stats.stale,
            cache_stats.corrupt_recomputed
        );
        if stats.vectors.embedding_failures > 0 {
            warn!(
                "{} field(s) were skipped after repeated embedding failures",
                stats.vectors.embedding_failures
            );
        }
    }

    if progress_config.should_show_memory() {
        let final_memory_mb = get_memory_usage().await;
        info!("Final memory usage: {} MB", final_memory_mb);
    }

    let (pool_size, idle_connections, in_use_connections) = get_pool_status(&pool);
    info!(
        "Final DB Connection Pool Status: Total: {}, Idle: {}, In Use: {}",
        pool_size, idle_connections, in_use_connections
    );

    info!("Duplicate detection completed successfully!");
    Ok(())
}
