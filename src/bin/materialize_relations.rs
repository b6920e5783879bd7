// src/bin/materialize_relations.rs
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use dedupe_lib::relations::{materialize_relations, RelationOptions};
use dedupe_lib::report::{read_tabular_report, TABULAR_REPORT_FILE};
use dedupe_lib::store::{ensure_schema, PgRecordStore};
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::dedupe_config::DedupeConfig;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_config::{create_detail_bar, ProgressConfig};

/// Applies the related_ids write-back from a previously written tabular
/// report, without recomputing any embeddings.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tabular report to read (defaults to <DEDUPE_OUTPUT_DIR>/potential_duplicates.csv)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log the changes without writing them
    #[arg(long)]
    dry_run: bool,

    /// Clear related_ids on records that are not an ID1 in the report
    /// (also enabled by DEDUPE_CLEAR_STALE_RELATIONS)
    #[arg(long)]
    clear_stale_relations: bool,
}

/// Flags win over the environment only when they turn something on.
fn resolve(args: &Args, config: &DedupeConfig) -> (PathBuf, RelationOptions) {
    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| config.output_dir.join(TABULAR_REPORT_FILE));
    let options = RelationOptions {
        clear_stale: args.clear_stale_relations || config.clear_stale_relations,
        dry_run: args.dry_run,
    };
    (report_path, options)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = Args::parse();
    let start = Instant::now();

    let config = DedupeConfig::from_env().context("Failed to read configuration")?;
    let (report_path, options) = resolve(&args, &config);
    info!(
        "Materializing relations from {} (clear stale: {}, dry run: {})",
        report_path.display(),
        options.clear_stale,
        options.dry_run
    );
    let pairs = read_tabular_report(&report_path)?;

    let pool = connect("activity_dedupe/materialize_relations")
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool).await?;
    let store = PgRecordStore::new(pool);

    let progress_config = ProgressConfig::from_env();
    let multi_progress = progress_config.create_multi_progress();
    let pb = multi_progress
        .as_ref()
        .map(|mp| create_detail_bar(mp, 0, "Writing related_ids"))
        .transpose()?;

    let stats = materialize_relations(&store, &pairs, options, pb).await?;

    info!(
        "Done in {:.2?}: {} written, {} unchanged, {} cleared, {} pair(s) dropped{}",
        start.elapsed(),
        stats.relations_written,
        stats.relations_unchanged,
        stats.relations_cleared,
        stats.pairs_dropped_missing,
        if stats.dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}
