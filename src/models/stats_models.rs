// src/models/stats_models.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorPreparationStats {
    pub activities_processed: usize,
    pub fields_embedded: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub stale_entries: usize,
    pub corrupt_entries_recomputed: usize,
    /// Fields whose normalized text was empty, so no vector exists.
    pub no_signal_fields: usize,
    /// Fields skipped because the provider kept failing.
    pub embedding_failures: usize,
    pub processing_time: f64,
}

/// Where the engine stood at the last batch boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub batches_completed: usize,
    pub total_batches: usize,
    pub records_processed: usize,
    pub total_records: usize,
    pub pairs_found: usize,
}

impl BatchCheckpoint {
    pub fn percentage(&self) -> f64 {
        if self.total_records == 0 {
            100.0
        } else {
            self.records_processed as f64 / self.total_records as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_records: usize,
    pub batches: usize,
    pub pairs_compared: usize,
    pub pairs_retained: usize,
    /// Field comparisons short-circuited to 0.0 because a side had no signal.
    pub no_signal_comparisons: usize,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationStats {
    pub relations_written: usize,
    pub relations_unchanged: usize,
    pub pairs_dropped_missing: usize,
    pub relations_cleared: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub run_id: String,
    pub total_records: usize,
    pub pairs_found: usize,
    pub vectors: VectorPreparationStats,
    pub engine: EngineStats,
    pub relations: Option<RelationStats>,
    pub total_processing_time: f64,
}
