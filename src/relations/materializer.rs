// src/relations/materializer.rs

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::DedupeError;
use crate::models::activity::ActivityId;
use crate::models::matching::CandidatePair;
use crate::models::stats_models::RelationStats;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct RelationOptions {
    /// Clear `related_ids` on records that are no longer the id1 of any pair.
    pub clear_stale: bool,
    /// Log what would change without writing anything.
    pub dry_run: bool,
}

/// id1 -> ascending set of id2 values paired with it.
pub fn build_relation_map(pairs: &[CandidatePair]) -> BTreeMap<ActivityId, BTreeSet<ActivityId>> {
    let mut map: BTreeMap<ActivityId, BTreeSet<ActivityId>> = BTreeMap::new();
    for pair in pairs {
        map.entry(pair.id1).or_default().insert(pair.id2);
    }
    map
}

/// Comma-joined ids in ascending numeric order, e.g. "2,9,10".
pub fn relation_string(ids: &BTreeSet<ActivityId>) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Existence lookups against the store, each id queried at most once.
struct PresenceCache<'a> {
    store: &'a dyn RecordStore,
    known: HashMap<ActivityId, Option<Option<String>>>,
}

impl<'a> PresenceCache<'a> {
    /// `None` when the record is absent, otherwise its current `related_ids`.
    async fn lookup(&mut self, id: ActivityId) -> Result<Option<Option<String>>> {
        if let Some(known) = self.known.get(&id) {
            return Ok(known.clone());
        }
        let found = self
            .store
            .get_activity(id)
            .await
            .with_context(|| format!("Failed to look up activity {}", id))?
            .map(|a| a.related_ids);
        self.known.insert(id, found.clone());
        Ok(found)
    }
}

/// Writes each id1's suspected duplicates into its `related_ids` column.
///
/// Only id1 of each pair is annotated, so the relation is a directed hint.
/// Pairs that reference an id no longer in the store are dropped with a
/// warning. A write that would leave the stored value unchanged is skipped,
/// which makes repeated runs over the same pairs idempotent.
///
/// The store must not be modified by anyone else while this runs: lookups and
/// writes are not wrapped in a transaction.
pub async fn materialize_relations(
    store: &dyn RecordStore,
    pairs: &[CandidatePair],
    options: RelationOptions,
    progress: Option<ProgressBar>,
) -> Result<RelationStats> {
    let relation_map = build_relation_map(pairs);
    let mut stats = RelationStats {
        dry_run: options.dry_run,
        ..Default::default()
    };
    let mut presence = PresenceCache {
        store,
        known: HashMap::new(),
    };
    let mut annotated: BTreeSet<ActivityId> = BTreeSet::new();

    info!(
        "Materializing relations for {} record(s) from {} pair(s){}",
        relation_map.len(),
        pairs.len(),
        if options.dry_run { " (dry run)" } else { "" }
    );
    if let Some(pb) = &progress {
        pb.set_length(relation_map.len() as u64);
        pb.set_position(0);
    }

    for (id1, id2s) in &relation_map {
        if let Some(pb) = &progress {
            pb.inc(1);
        }

        let Some(current) = presence.lookup(*id1).await? else {
            warn!(
                "{}; dropping {} pair(s) with it as ID1",
                DedupeError::MissingRecord(*id1),
                id2s.len()
            );
            stats.pairs_dropped_missing += id2s.len();
            continue;
        };

        let mut present: BTreeSet<ActivityId> = BTreeSet::new();
        for id2 in id2s {
            if presence.lookup(*id2).await?.is_some() {
                present.insert(*id2);
            } else {
                warn!(
                    "{}; dropping pair ({}, {})",
                    DedupeError::MissingRecord(*id2),
                    id1,
                    id2
                );
                stats.pairs_dropped_missing += 1;
            }
        }
        if present.is_empty() {
            continue;
        }

        let related = relation_string(&present);
        annotated.insert(*id1);
        if current.as_deref() == Some(related.as_str()) {
            debug!("related_ids for activity {} already '{}'", id1, related);
            stats.relations_unchanged += 1;
            continue;
        }

        if options.dry_run {
            info!(
                "[dry run] would set related_ids of activity {} to '{}' (was {:?})",
                id1, related, current
            );
        } else {
            store.update_relation(*id1, Some(&related)).await?;
            debug!("Set related_ids of activity {} to '{}'", id1, related);
        }
        stats.relations_written += 1;
    }

    if options.clear_stale {
        let activities = store
            .list_activities()
            .await
            .context("Failed to list activities for stale relation check")?;
        for activity in activities {
            let has_relation = activity
                .related_ids
                .as_deref()
                .map_or(false, |r| !r.trim().is_empty());
            if !has_relation || annotated.contains(&activity.id) {
                continue;
            }
            if options.dry_run {
                info!(
                    "[dry run] would clear stale related_ids of activity {}",
                    activity.id
                );
            } else {
                store.update_relation(activity.id, None).await?;
                debug!("Cleared stale related_ids of activity {}", activity.id);
            }
            stats.relations_cleared += 1;
        }
    }

    info!(
        "Relations: {} written, {} unchanged, {} cleared, {} pair(s) dropped for missing records{}",
        stats.relations_written,
        stats.relations_unchanged,
        stats.relations_cleared,
        stats.pairs_dropped_missing,
        if options.dry_run { " (dry run, nothing stored)" } else { "" }
    );
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok(stats)
}
