// src/pipeline.rs
//! One duplicate detection run: load records, prepare vectors, compare,
//! write the reports, then annotate the record store.

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};
use log::info;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::candidate_generation::prepare_activity_vectors;
use crate::embedding::{OpenAiEmbedder, RetryPolicy, VectorCache, VectorStore};
use crate::matching::engine::{find_candidate_pairs, EngineOptions};
use crate::models::matching::CandidatePair;
use crate::models::stats_models::PipelineStats;
use crate::relations::{materialize_relations, RelationOptions};
use crate::report::{build_report, DuplicateReport, ReportPaths};
use crate::store::RecordStore;
use crate::utils::dedupe_config::DedupeConfig;
use crate::utils::progress_config::{create_detail_bar, create_phase_bar};

const PIPELINE_PHASES: u64 = 4;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: String,
    /// Compute and write reports, but leave `related_ids` untouched.
    pub dry_run: bool,
    /// Stop after the reports; the relation step can run later from the CSV.
    pub skip_relations: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub pairs: Vec<CandidatePair>,
    pub report: DuplicateReport,
    pub report_paths: ReportPaths,
    pub stats: PipelineStats,
}

/// Builds the embedding client and its cache. Fails on a missing or unusable
/// API key, so callers can do this before recording a run.
pub fn build_vector_cache(
    config: &DedupeConfig,
    vector_store: Arc<dyn VectorStore>,
) -> Result<VectorCache> {
    let embedder = OpenAiEmbedder::from_config(&config.embedding)
        .context("Failed to initialize embedding provider")?;
    info!("Embedding endpoint: {}", embedder.endpoint());
    let retry = RetryPolicy {
        max_attempts: config.embedding.max_attempts,
        initial_backoff: config.embedding.retry_backoff,
    };
    Ok(VectorCache::new(
        Arc::new(embedder),
        vector_store,
        retry,
        config.vector_cache_size,
    ))
}

fn detail_bar(mp: Option<&MultiProgress>, message: &str) -> Result<Option<ProgressBar>> {
    mp.map(|mp| create_detail_bar(mp, 0, message)).transpose()
}

/// Runs every phase in order against the given store and cache.
///
/// A run that finds nothing still writes both reports, each saying
/// "Found 0 potential duplicate(s).", so an empty result is never confused
/// with a failed run.
pub async fn run_duplicate_pipeline(
    store: &dyn RecordStore,
    cache: &mut VectorCache,
    config: &DedupeConfig,
    options: &RunOptions,
    stop_flag: Option<&AtomicBool>,
    multi_progress: Option<&MultiProgress>,
) -> Result<PipelineOutcome> {
    let run_start = Instant::now();
    config.validate()?;

    let phase_pb = multi_progress
        .map(|mp| create_phase_bar(mp, PIPELINE_PHASES))
        .transpose()?;
    let set_phase = |msg: &str| {
        if let Some(pb) = &phase_pb {
            pb.set_message(msg.to_string());
        }
    };
    let advance = || {
        if let Some(pb) = &phase_pb {
            pb.inc(1);
        }
    };

    // Phase 1: records and vectors
    set_phase("Preparing vectors...");
    info!("Phase 1: Loading activities and preparing vectors");
    let activities = store
        .list_activities()
        .await
        .context("Failed to load activities from the record store")?;
    info!("Loaded {} activities", activities.len());

    let vector_pb = detail_bar(multi_progress, "Embedding compared fields")?;
    let (vectors, vector_stats) = prepare_activity_vectors(
        &activities,
        cache,
        &config.compared_fields,
        stop_flag,
        vector_pb,
    )
    .await?;
    advance();

    // Phase 2: pairwise comparison
    set_phase("Comparing pairs...");
    info!("Phase 2: Pairwise similarity");
    let engine_options = EngineOptions {
        similarity_threshold: config.similarity_threshold,
        batch_size: config.batch_size,
        compared_fields: config.compared_fields.clone(),
    };
    let batch_pb = detail_bar(multi_progress, "Comparing batches")?;
    let outcome = find_candidate_pairs(&vectors, &engine_options, stop_flag, batch_pb)?;
    advance();

    // Phase 3: reports
    set_phase("Writing reports...");
    info!("Phase 3: Writing duplicate reports");
    let report = build_report(&outcome.pairs, &activities, &config.compared_fields);
    info!("{}", report.summary_line());
    let report_paths = report
        .write_to_dir(&config.output_dir)
        .context("Failed to write duplicate reports")?;
    advance();

    // Phase 4: relations
    let relations = if options.skip_relations {
        info!("Phase 4: Skipped (relations not requested)");
        None
    } else {
        set_phase("Materializing relations...");
        info!("Phase 4: Materializing relations");
        let relation_pb = detail_bar(multi_progress, "Writing related_ids")?;
        let relation_options = RelationOptions {
            clear_stale: config.clear_stale_relations,
            dry_run: options.dry_run,
        };
        Some(materialize_relations(store, &outcome.pairs, relation_options, relation_pb).await?)
    };
    advance();

    let stats = PipelineStats {
        run_id: options.run_id.clone(),
        total_records: activities.len(),
        pairs_found: outcome.pairs.len(),
        vectors: vector_stats,
        engine: outcome.stats,
        relations,
        total_processing_time: run_start.elapsed().as_secs_f64(),
    };

    if let Some(pb) = &phase_pb {
        pb.finish_with_message("Duplicate detection complete");
    }

    Ok(PipelineOutcome {
        pairs: outcome.pairs,
        report,
        report_paths,
        stats,
    })
}
