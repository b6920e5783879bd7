// src/candidate_generation/activity_vectors.rs

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::embedding::VectorCache;
use crate::error::DedupeError;
use crate::matching::normalize::normalize_text;
use crate::models::activity::{Activity, ActivityField};
use crate::models::matching::ActivityVectors;
use crate::models::stats_models::VectorPreparationStats;

/// Normalizes every compared field of every activity and resolves its vector
/// through the cache.
///
/// A field whose text normalizes to "" gets no vector. A field whose embedding
/// still fails transiently after retries is skipped with a warning and also
/// gets no vector, so that record simply cannot match on that field this run.
/// Any other error aborts preparation.
pub async fn prepare_activity_vectors(
    activities: &[Activity],
    cache: &mut VectorCache,
    compared_fields: &BTreeSet<ActivityField>,
    stop_flag: Option<&AtomicBool>,
    progress: Option<ProgressBar>,
) -> Result<(Vec<ActivityVectors>, VectorPreparationStats)> {
    let start_time = Instant::now();
    let cache_before = cache.stats();
    let mut stats = VectorPreparationStats::default();
    let mut prepared = Vec::with_capacity(activities.len());

    info!(
        "Preparing {} vector(s) for {} activities with model {}",
        compared_fields.len(),
        activities.len(),
        cache.model_id()
    );
    if let Some(pb) = &progress {
        pb.set_length(activities.len() as u64);
        pb.set_position(0);
    }

    for (idx, activity) in activities.iter().enumerate() {
        if stop_flag.map_or(false, |flag| flag.load(Ordering::SeqCst)) {
            warn!(
                "Stop requested during vector preparation after {}/{} activities",
                idx,
                activities.len()
            );
            if let Some(pb) = &progress {
                pb.abandon_with_message("Interrupted");
            }
            return Err(DedupeError::Interrupted {
                phase: "embedding",
                processed: idx,
                total: activities.len(),
                pairs_found: 0,
            }
            .into());
        }

        let mut vectors = ActivityVectors::new(activity.id);
        for field in compared_fields {
            let normalized = normalize_text(activity.field(*field));
            if normalized.is_empty() {
                debug!("Activity {} has no {} text", activity.id, field);
                stats.no_signal_fields += 1;
                vectors.vectors.insert(*field, None);
                continue;
            }

            let vector = match cache.get_or_compute(activity.id, *field, &normalized).await {
                Ok(vector) => {
                    stats.fields_embedded += 1;
                    vector
                }
                Err(e) => {
                    let recoverable = e
                        .downcast_ref::<DedupeError>()
                        .filter(|d| !d.is_fatal())
                        .map(|d| d.to_string());
                    let Some(reason) = recoverable else {
                        return Err(e).with_context(|| {
                            format!("Failed to prepare {} vector for activity {}", field, activity.id)
                        });
                    };
                    warn!("Skipping {} of activity {}: {}", field, activity.id, reason);
                    stats.embedding_failures += 1;
                    None
                }
            };
            vectors.vectors.insert(*field, vector);
        }
        prepared.push(vectors);
        stats.activities_processed += 1;

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    let cache_after = cache.stats();
    stats.cache_hits = (cache_after.memory_hits + cache_after.store_hits)
        - (cache_before.memory_hits + cache_before.store_hits);
    stats.cache_misses = cache_after.misses - cache_before.misses;
    stats.stale_entries = cache_after.stale - cache_before.stale;
    stats.corrupt_entries_recomputed = cache_after.corrupt_recomputed - cache_before.corrupt_recomputed;
    stats.processing_time = start_time.elapsed().as_secs_f64();

    info!(
        "Vector preparation completed in {:.2?}: {} embedded, {} cache hit(s), {} computed, {} no-signal, {} failed",
        start_time.elapsed(),
        stats.fields_embedded,
        stats.cache_hits,
        stats.cache_misses + stats.stale_entries + stats.corrupt_entries_recomputed,
        stats.no_signal_fields,
        stats.embedding_failures
    );
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok((prepared, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::test_support::StubProvider;
    use crate::embedding::{MemoryVectorStore, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn cache(provider: Arc<StubProvider>) -> VectorCache {
        VectorCache::new(
            provider,
            Arc::new(MemoryVectorStore::new()),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::ZERO,
            },
            64,
        )
    }

    fn titles() -> BTreeSet<ActivityField> {
        BTreeSet::from([ActivityField::Title])
    }

    #[tokio::test]
    async fn test_text_is_normalized_before_embedding() {
        let provider = Arc::new(StubProvider::new(2).with("paper airplane craft", vec![1.0, 0.0]));
        let mut cache = cache(provider.clone());
        let activities = vec![Activity::new(1, "  Paper Airplane, Craft! ")];

        let (vectors, stats) = prepare_activity_vectors(&activities, &mut cache, &titles(), None, None)
            .await
            .unwrap();
        assert_eq!(vectors[0].get(ActivityField::Title), Some(&vec![1.0, 0.0]));
        assert_eq!(stats.fields_embedded, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_empty_fields_have_no_vector() {
        let provider = Arc::new(StubProvider::new(2));
        let mut cache = cache(provider.clone());
        let mut blank = Activity::new(2, "");
        blank.description = None;
        let activities = vec![Activity::new(1, "?!"), blank];
        let fields = BTreeSet::from([ActivityField::Title, ActivityField::Description]);

        let (vectors, stats) = prepare_activity_vectors(&activities, &mut cache, &fields, None, None)
            .await
            .unwrap();
        assert!(vectors.iter().all(|v| v.get(ActivityField::Title).is_none()));
        assert_eq!(stats.no_signal_fields, 4);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_skips_the_field() {
        let mut stub = StubProvider::new(2).with("paper plane", vec![0.0, 1.0]);
        stub.always_fail.push("volcano".to_string());
        let provider = Arc::new(stub);
        let mut cache = cache(provider.clone());
        let activities = vec![Activity::new(1, "Volcano"), Activity::new(2, "Paper Plane")];

        let (vectors, stats) = prepare_activity_vectors(&activities, &mut cache, &titles(), None, None)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors[0].get(ActivityField::Title).is_none());
        assert!(vectors[1].get(ActivityField::Title).is_some());
        assert_eq!(stats.embedding_failures, 1);
        assert_eq!(stats.activities_processed, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let provider = Arc::new(StubProvider::new(3).with("volcano", vec![1.0, 0.0]));
        let mut cache = cache(provider);
        let activities = vec![Activity::new(1, "Volcano")];

        let err = prepare_activity_vectors(&activities, &mut cache, &titles(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DedupeError>(),
            Some(DedupeError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_flag_interrupts_before_work() {
        let provider = Arc::new(StubProvider::new(2));
        let mut cache = cache(provider.clone());
        let stop = AtomicBool::new(true);
        let activities = vec![Activity::new(1, "Volcano")];

        let err = prepare_activity_vectors(&activities, &mut cache, &titles(), Some(&stop), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DedupeError>(),
            Some(DedupeError::Interrupted { phase: "embedding", processed: 0, total: 1, .. })
        ));
        assert_eq!(provider.calls(), 0);
    }
}
