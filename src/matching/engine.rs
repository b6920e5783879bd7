// src/matching/engine.rs
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::DedupeError;
use crate::matching::similarity::PreparedVector;
use crate::models::activity::{ActivityField, ActivityId};
use crate::models::matching::{ActivityVectors, CandidatePair, FieldSimilarity};
use crate::models::stats_models::{BatchCheckpoint, EngineStats};

/// Knobs for one engine run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub similarity_threshold: f64,
    pub batch_size: usize,
    pub compared_fields: BTreeSet<ActivityField>,
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Retained pairs in discovery order: batch, then id1, then id2.
    pub pairs: Vec<CandidatePair>,
    pub stats: EngineStats,
    pub checkpoint: BatchCheckpoint,
}

struct PreparedRecord {
    activity_id: ActivityId,
    /// One slot per compared field, in `compared_fields` order. `None` = no signal.
    fields: Vec<Option<PreparedVector>>,
}

/// Widens every vector once and enforces that all vectors of a field share
/// one dimensionality.
fn prepare_records(
    records: &[ActivityVectors],
    fields: &[ActivityField],
) -> Result<Vec<PreparedRecord>, DedupeError> {
    let mut sorted: Vec<&ActivityVectors> = records.iter().collect();
    sorted.sort_by_key(|r| r.activity_id);

    let mut expected_dims: Vec<Option<(usize, ActivityId)>> = vec![None; fields.len()];
    let mut prepared: Vec<PreparedRecord> = Vec::with_capacity(sorted.len());

    for record in sorted {
        if prepared
            .last()
            .map_or(false, |p| p.activity_id == record.activity_id)
        {
            warn!(
                "Activity {} supplied twice to the similarity engine; keeping the first",
                record.activity_id
            );
            continue;
        }

        let mut slots = Vec::with_capacity(fields.len());
        for (slot, field) in fields.iter().enumerate() {
            let prepared_vector = match record.get(*field) {
                Some(vector) if !vector.is_empty() => {
                    match expected_dims[slot] {
                        None => expected_dims[slot] = Some((vector.len(), record.activity_id)),
                        Some((expected, first_id)) if expected != vector.len() => {
                            debug!(
                                "Dimension of {} vectors fixed at {} by activity {}",
                                field, expected, first_id
                            );
                            return Err(DedupeError::DimensionMismatch {
                                activity_id: record.activity_id,
                                field: *field,
                                expected,
                                found: vector.len(),
                            });
                        }
                        Some(_) => {}
                    }
                    let pv = PreparedVector::new(vector);
                    if pv.has_signal() {
                        Some(pv)
                    } else {
                        debug!(
                            "Activity {} has a zero-norm {} vector; treating as no signal",
                            record.activity_id, field
                        );
                        None
                    }
                }
                _ => None,
            };
            slots.push(prepared_vector);
        }

        prepared.push(PreparedRecord {
            activity_id: record.activity_id,
            fields: slots,
        });
    }

    Ok(prepared)
}

/// Finds every pair of activities whose similarity on at least one compared
/// field is >= the threshold.
///
/// Only `id1 < id2` pairs are examined. Work is split into windows of
/// `batch_size` id1 rows, each compared against every later row; the stop flag
/// is honoured and progress reported at window boundaries. Results do not
/// depend on the batch size.
pub fn find_candidate_pairs(
    records: &[ActivityVectors],
    options: &EngineOptions,
    stop_flag: Option<&AtomicBool>,
    progress: Option<ProgressBar>,
) -> Result<EngineOutcome> {
    let start_time = Instant::now();
    let fields: Vec<ActivityField> = options.compared_fields.iter().copied().collect();
    if fields.is_empty() || options.batch_size == 0 {
        return Err(DedupeError::InvalidConfig(
            "similarity engine needs at least one field and a positive batch size".to_string(),
        )
        .into());
    }

    let prepared = prepare_records(records, &fields)?;
    let total = prepared.len();
    let total_batches = (total + options.batch_size - 1) / options.batch_size;

    let mut stats = EngineStats {
        total_records: total,
        ..Default::default()
    };
    let mut checkpoint = BatchCheckpoint {
        total_batches,
        total_records: total,
        ..Default::default()
    };
    let mut pairs: Vec<CandidatePair> = Vec::new();

    if let Some(pb) = &progress {
        pb.set_length(total as u64);
        pb.set_position(0);
    }

    info!(
        "Comparing {} activities on [{}] in {} batch(es) of {} (threshold {})",
        total,
        fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", "),
        total_batches,
        options.batch_size,
        options.similarity_threshold
    );

    for (batch_idx, window_start) in (0..total).step_by(options.batch_size).enumerate() {
        if stop_flag.map_or(false, |flag| flag.load(Ordering::SeqCst)) {
            warn!(
                "Stop requested at batch boundary {}/{}: {}/{} activities compared, {} pair(s) found",
                checkpoint.batches_completed,
                total_batches,
                checkpoint.records_processed,
                total,
                checkpoint.pairs_found
            );
            if let Some(pb) = &progress {
                pb.abandon_with_message("Interrupted");
            }
            return Err(DedupeError::Interrupted {
                phase: "comparison",
                processed: checkpoint.records_processed,
                total,
                pairs_found: checkpoint.pairs_found,
            }
            .into());
        }

        let window_end = (window_start + options.batch_size).min(total);
        for i in window_start..window_end {
            let left = &prepared[i];
            for right in &prepared[i + 1..] {
                stats.pairs_compared += 1;
                let mut scores = Vec::with_capacity(fields.len());
                let mut retained = false;

                for (slot, field) in fields.iter().enumerate() {
                    let similarity = match (&left.fields[slot], &right.fields[slot]) {
                        (Some(a), Some(b)) => {
                            let sim = a.cosine(b).with_context(|| {
                                format!(
                                    "Comparing {} of activities {} and {}",
                                    field, left.activity_id, right.activity_id
                                )
                            })?;
                            if sim >= options.similarity_threshold {
                                retained = true;
                            }
                            sim
                        }
                        _ => {
                            stats.no_signal_comparisons += 1;
                            0.0
                        }
                    };
                    scores.push(FieldSimilarity {
                        field: *field,
                        similarity,
                    });
                }

                if retained {
                    if let Some(pair) =
                        CandidatePair::new(left.activity_id, right.activity_id, scores)
                    {
                        debug!(
                            "Candidate pair: {} <-> {} ({:?})",
                            pair.id1, pair.id2, pair.scores
                        );
                        pairs.push(pair);
                    }
                }
            }
        }

        checkpoint.batches_completed = batch_idx + 1;
        checkpoint.records_processed = window_end;
        checkpoint.pairs_found = pairs.len();

        info!(
            "Progress: {:.2}% ({}/{})",
            checkpoint.percentage(),
            checkpoint.records_processed,
            total
        );
        if let Some(pb) = &progress {
            pb.set_position(window_end as u64);
            pb.set_message(format!("{} pair(s) found", pairs.len()));
        }
    }

    stats.batches = checkpoint.batches_completed;
    stats.pairs_retained = pairs.len();
    stats.processing_time = start_time.elapsed().as_secs_f64();

    info!(
        "Similarity engine completed: {} pair(s) retained from {} comparisons in {:.2?}",
        stats.pairs_retained,
        stats.pairs_compared,
        start_time.elapsed()
    );

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok(EngineOutcome {
        pairs,
        stats,
        checkpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(threshold: f64, batch_size: usize, fields: &[ActivityField]) -> EngineOptions {
        EngineOptions {
            similarity_threshold: threshold,
            batch_size,
            compared_fields: fields.iter().copied().collect(),
        }
    }

    fn titled(id: ActivityId, vector: Option<Vec<f32>>) -> ActivityVectors {
        ActivityVectors::new(id).with_vector(ActivityField::Title, vector)
    }

    /// Ten records in three loose families plus one empty title.
    fn ten_records() -> Vec<ActivityVectors> {
        vec![
            titled(1, Some(vec![1.0, 0.0, 0.0])),
            titled(2, Some(vec![0.98, 0.05, 0.0])),
            titled(3, Some(vec![0.0, 1.0, 0.0])),
            titled(4, Some(vec![0.95, 0.1, 0.05])),
            titled(5, Some(vec![0.0, 0.97, 0.1])),
            titled(6, None),
            titled(7, Some(vec![0.0, 0.0, 1.0])),
            titled(8, Some(vec![0.1, 0.0, 0.99])),
            titled(9, Some(vec![0.5, 0.5, 0.5])),
            titled(10, Some(vec![0.0, 0.0, 0.0])),
        ]
    }

    #[test]
    fn test_pairs_are_canonical_and_never_self() {
        let outcome = find_candidate_pairs(
            &ten_records(),
            &options(0.5, 3, &[ActivityField::Title]),
            None,
            None,
        )
        .unwrap();
        assert!(!outcome.pairs.is_empty());
        for pair in &outcome.pairs {
            assert!(pair.id1 < pair.id2, "{:?} not canonical", pair);
        }
        assert_eq!(outcome.stats.pairs_compared, 10 * 9 / 2);
    }

    #[test]
    fn test_batch_size_does_not_change_results() {
        let records = ten_records();
        let fields = [ActivityField::Title];
        let single = find_candidate_pairs(&records, &options(0.8, 1, &fields), None, None).unwrap();
        let default = find_candidate_pairs(&records, &options(0.8, 25, &fields), None, None).unwrap();
        let odd = find_candidate_pairs(&records, &options(0.8, 4, &fields), None, None).unwrap();

        assert_eq!(single.pairs, default.pairs);
        assert_eq!(odd.pairs, default.pairs);
        assert_eq!(single.stats.batches, 10);
        assert_eq!(default.stats.batches, 1);
        assert_eq!(odd.stats.batches, 3);
    }

    #[test]
    fn test_discovery_order_follows_ids() {
        let mut records = ten_records();
        records.reverse();
        let outcome = find_candidate_pairs(
            &records,
            &options(0.8, 2, &[ActivityField::Title]),
            None,
            None,
        )
        .unwrap();
        let ids: Vec<(ActivityId, ActivityId)> =
            outcome.pairs.iter().map(|p| (p.id1, p.id2)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids, vec![(1, 2), (1, 4), (2, 4), (3, 5), (7, 8)]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // cos([4,3], [1,0]) is exactly 0.8.
        let records = vec![titled(1, Some(vec![4.0, 3.0])), titled(2, Some(vec![1.0, 0.0]))];
        let at = find_candidate_pairs(&records, &options(0.8, 25, &[ActivityField::Title]), None, None)
            .unwrap();
        assert_eq!(at.pairs.len(), 1);
        assert_eq!(at.pairs[0].similarity(ActivityField::Title), Some(0.8));

        let above = find_candidate_pairs(
            &records,
            &options(0.8 + 1e-9, 25, &[ActivityField::Title]),
            None,
            None,
        )
        .unwrap();
        assert!(above.pairs.is_empty());

        // Same boundary with a similarity just under the threshold.
        let records = vec![titled(1, Some(vec![3.0, 4.0])), titled(2, Some(vec![4.0, 3.0]))];
        let exact = find_candidate_pairs(&records, &options(0.96, 25, &[ActivityField::Title]), None, None)
            .unwrap();
        assert_eq!(exact.pairs.len(), 1);
        let below = find_candidate_pairs(
            &records,
            &options(0.96 + 1e-9, 25, &[ActivityField::Title]),
            None,
            None,
        )
        .unwrap();
        assert!(below.pairs.is_empty());
    }

    #[test]
    fn test_missing_and_zero_vectors_never_match() {
        let records = vec![
            titled(1, None),
            titled(2, None),
            titled(3, Some(vec![0.0, 0.0])),
            titled(4, Some(vec![0.0, 0.0])),
            titled(5, Some(vec![1.0, 1.0])),
        ];
        // Even the loosest valid threshold must not pair records without signal.
        let outcome = find_candidate_pairs(
            &records,
            &options(f64::MIN_POSITIVE, 25, &[ActivityField::Title]),
            None,
            None,
        )
        .unwrap();
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stats.no_signal_comparisons, 10);
    }

    #[test]
    fn test_any_field_retains_pair() {
        let a = ActivityVectors::new(1)
            .with_vector(ActivityField::Title, Some(vec![1.0, 0.0]))
            .with_vector(ActivityField::Supplies, Some(vec![1.0, 1.0]));
        let b = ActivityVectors::new(2)
            .with_vector(ActivityField::Title, Some(vec![0.0, 1.0]))
            .with_vector(ActivityField::Supplies, Some(vec![1.0, 1.0]));
        let records = vec![a, b];

        let title_only =
            find_candidate_pairs(&records, &options(0.8, 25, &[ActivityField::Title]), None, None)
                .unwrap();
        assert!(title_only.pairs.is_empty());

        let both = find_candidate_pairs(
            &records,
            &options(0.8, 25, &[ActivityField::Title, ActivityField::Supplies]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(both.pairs.len(), 1);
        let pair = &both.pairs[0];
        assert_eq!(pair.similarity(ActivityField::Title), Some(0.0));
        assert!(pair.similarity(ActivityField::Supplies).unwrap() > 0.99);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let records = vec![
            titled(1, Some(vec![1.0, 0.0, 0.0])),
            titled(2, Some(vec![1.0, 0.0])),
        ];
        let err = find_candidate_pairs(&records, &options(0.8, 25, &[ActivityField::Title]), None, None)
            .unwrap_err();
        match err.downcast_ref::<DedupeError>() {
            Some(DedupeError::DimensionMismatch {
                activity_id,
                expected,
                found,
                ..
            }) => {
                assert_eq!(*activity_id, 2);
                assert_eq!(*expected, 3);
                assert_eq!(*found, 2);
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_flag_interrupts_at_batch_boundary() {
        let flag = AtomicBool::new(true);
        let err = find_candidate_pairs(
            &ten_records(),
            &options(0.8, 5, &[ActivityField::Title]),
            Some(&flag),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DedupeError>(),
            Some(DedupeError::Interrupted {
                processed: 0,
                total: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_input() {
        let outcome =
            find_candidate_pairs(&[], &options(0.8, 25, &[ActivityField::Title]), None, None).unwrap();
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stats.batches, 0);
        assert_eq!(outcome.checkpoint.percentage(), 100.0);
    }
}
