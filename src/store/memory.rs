// src/store/memory.rs
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::models::activity::{Activity, ActivityId};
use crate::store::RecordStore;

/// Record store held in process memory. Counts relation writes so callers can
/// check that unchanged relations were skipped.
#[derive(Default)]
pub struct MemoryRecordStore {
    activities: Mutex<BTreeMap<ActivityId, Activity>>,
    relation_writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self {
            activities: Mutex::new(activities.into_iter().map(|a| (a.id, a)).collect()),
            relation_writes: AtomicUsize::new(0),
        }
    }

    pub fn relation_writes(&self) -> usize {
        self.relation_writes.load(Ordering::SeqCst)
    }

    pub async fn related_ids(&self, id: ActivityId) -> Option<String> {
        self.activities
            .lock()
            .await
            .get(&id)
            .and_then(|a| a.related_ids.clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_activities(&self) -> Result<Vec<Activity>> {
        Ok(self.activities.lock().await.values().cloned().collect())
    }

    async fn get_activity(&self, id: ActivityId) -> Result<Option<Activity>> {
        Ok(self.activities.lock().await.get(&id).cloned())
    }

    async fn update_relation(&self, id: ActivityId, related_ids: Option<&str>) -> Result<()> {
        if let Some(activity) = self.activities.lock().await.get_mut(&id) {
            activity.related_ids = related_ids.map(str::to_string);
            self.relation_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_sorted_by_id() {
        let store = MemoryRecordStore::new(vec![
            Activity::new(3, "Volcano"),
            Activity::new(1, "Paper Plane"),
        ]);
        let ids: Vec<ActivityId> = store
            .list_activities()
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_update_relation_on_missing_id_is_a_no_op() {
        let store = MemoryRecordStore::new(vec![Activity::new(1, "Paper Plane")]);
        store.update_relation(1, Some("2,3")).await.unwrap();
        store.update_relation(99, Some("1")).await.unwrap();
        assert_eq!(store.related_ids(1).await.as_deref(), Some("2,3"));
        assert_eq!(store.relation_writes(), 1);
    }
}
