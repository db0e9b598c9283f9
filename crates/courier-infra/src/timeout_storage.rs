//! In-memory timeout storage.
//!
//! Timeouts live only as long as the process. Suitable for tests and for
//! endpoints whose deferred messages may be lost on restart.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_core::context::ContextBag;
use courier_core::timeout::{TimeoutStorage, TimeoutStorageError};
use courier_types::timeout::{DueTimeout, TimeoutData, TimeoutsChunk};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// How long the poller may sleep when nothing is stored.
const EMPTY_STORAGE_QUERY_DELAY_SECS: i64 = 60;

/// Timeout storage over a concurrent map. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTimeoutStorage {
    timeouts: Arc<DashMap<String, TimeoutData>>,
}

impl InMemoryTimeoutStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    /// Ids of every stored timeout, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.timeouts.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl TimeoutStorage for InMemoryTimeoutStorage {
    async fn add(&self, timeout: TimeoutData, _context: &ContextBag) -> Result<(), TimeoutStorageError> {
        match self.timeouts.entry(timeout.id.clone()) {
            Entry::Occupied(_) => Err(TimeoutStorageError::Duplicate(timeout.id)),
            Entry::Vacant(slot) => {
                debug!(timeout_id = %timeout.id, due = %timeout.time, "timeout stored");
                slot.insert(timeout);
                Ok(())
            }
        }
    }

    async fn peek(&self, timeout_id: &str, _context: &ContextBag) -> Result<Option<TimeoutData>, TimeoutStorageError> {
        Ok(self.timeouts.get(timeout_id).map(|entry| entry.value().clone()))
    }

    async fn try_remove(&self, timeout_id: &str, _context: &ContextBag) -> Result<bool, TimeoutStorageError> {
        Ok(self.timeouts.remove(timeout_id).is_some())
    }

    async fn next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutsChunk, TimeoutStorageError> {
        let now = Utc::now();
        let mut due_timeouts = Vec::new();
        let mut next_time_to_query: Option<DateTime<Utc>> = None;

        for entry in self.timeouts.iter() {
            let time = entry.value().time;
            if time > start_slice && time <= now {
                due_timeouts.push(DueTimeout {
                    id: entry.key().clone(),
                    due_time: time,
                });
            } else if time > now {
                next_time_to_query = Some(next_time_to_query.map_or(time, |next| next.min(time)));
            }
        }
        due_timeouts.sort_by_key(|t| t.due_time);

        Ok(TimeoutsChunk {
            due_timeouts,
            next_time_to_query: next_time_to_query
                .unwrap_or_else(|| now + Duration::seconds(EMPTY_STORAGE_QUERY_DELAY_SECS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_types::message::Headers;

    use super::*;

    fn timeout(id: &str, time: DateTime<Utc>) -> TimeoutData {
        TimeoutData {
            id: id.into(),
            destination: "Sales".into(),
            state: b"{}".to_vec(),
            time,
            headers: Headers::new(),
            owning_timeout_manager: "Sales".into(),
        }
    }

    #[tokio::test]
    async fn next_chunk_returns_due_timeouts_in_due_order() {
        let storage = InMemoryTimeoutStorage::new();
        let ctx = ContextBag::new();
        let now = Utc::now();
        storage.add(timeout("late", now - Duration::seconds(1)), &ctx).await.unwrap();
        storage.add(timeout("early", now - Duration::seconds(5)), &ctx).await.unwrap();
        storage.add(timeout("future", now + Duration::minutes(5)), &ctx).await.unwrap();

        let chunk = storage.next_chunk(now - Duration::days(1)).await.unwrap();
        let ids: Vec<_> = chunk.due_timeouts.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
        assert_eq!(chunk.next_time_to_query, now + Duration::minutes(5));
    }

    #[tokio::test]
    async fn start_slice_excludes_older_timeouts() {
        let storage = InMemoryTimeoutStorage::new();
        let ctx = ContextBag::new();
        let now = Utc::now();
        storage.add(timeout("old", now - Duration::minutes(10)), &ctx).await.unwrap();

        let chunk = storage.next_chunk(now - Duration::minutes(5)).await.unwrap();
        assert!(chunk.due_timeouts.is_empty());
        assert!(chunk.next_time_to_query > now);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let storage = InMemoryTimeoutStorage::new();
        let ctx = ContextBag::new();
        storage.add(timeout("a", Utc::now()), &ctx).await.unwrap();
        let err = storage.add(timeout("a", Utc::now()), &ctx).await.unwrap_err();
        assert_eq!(err, TimeoutStorageError::Duplicate("a".into()));
    }

    #[tokio::test]
    async fn remove_reports_whether_the_timeout_existed() {
        let storage = InMemoryTimeoutStorage::new();
        let ctx = ContextBag::new();
        storage.add(timeout("a", Utc::now()), &ctx).await.unwrap();

        assert!(storage.peek("a", &ctx).await.unwrap().is_some());
        assert!(storage.try_remove("a", &ctx).await.unwrap());
        assert!(!storage.try_remove("a", &ctx).await.unwrap());
        assert!(storage.peek("a", &ctx).await.unwrap().is_none());
        assert!(storage.is_empty());
    }
}
