//! Test doubles shared by the unit tests of this crate.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use courier_types::error::TransportError;
use courier_types::message::OutgoingMessage;
use courier_types::timeout::{DueTimeout, TimeoutData, TimeoutsChunk};
use courier_types::transport::{DispatchConsistency, TransportOperations};

use crate::context::ContextBag;
use crate::timeout::{TimeoutStorage, TimeoutStorageError};
use crate::transport::DispatchMessages;

/// Records every dispatched batch.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub batches: Mutex<Vec<TransportOperations>>,
}

impl RecordingDispatcher {
    /// Every unicast operation as (destination, message, consistency).
    pub fn unicast(&self) -> Vec<(String, OutgoingMessage, DispatchConsistency)> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.unicast.iter())
            .map(|op| (op.destination.clone(), op.message.clone(), op.consistency))
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl DispatchMessages for RecordingDispatcher {
    async fn dispatch(&self, operations: TransportOperations, _context: &ContextBag) -> Result<(), TransportError> {
        self.batches.lock().unwrap().push(operations);
        Ok(())
    }
}

/// Timeout storage over a map, with no persistence.
#[derive(Default)]
pub struct MapTimeoutStorage {
    pub timeouts: Mutex<BTreeMap<String, TimeoutData>>,
}

impl MapTimeoutStorage {
    pub fn with(timeouts: impl IntoIterator<Item = TimeoutData>) -> Self {
        Self {
            timeouts: Mutex::new(timeouts.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.timeouts.lock().unwrap().len()
    }
}

impl TimeoutStorage for MapTimeoutStorage {
    async fn add(&self, timeout: TimeoutData, _context: &ContextBag) -> Result<(), TimeoutStorageError> {
        self.timeouts.lock().unwrap().insert(timeout.id.clone(), timeout);
        Ok(())
    }

    async fn peek(&self, timeout_id: &str, _context: &ContextBag) -> Result<Option<TimeoutData>, TimeoutStorageError> {
        Ok(self.timeouts.lock().unwrap().get(timeout_id).cloned())
    }

    async fn try_remove(&self, timeout_id: &str, _context: &ContextBag) -> Result<bool, TimeoutStorageError> {
        Ok(self.timeouts.lock().unwrap().remove(timeout_id).is_some())
    }

    async fn next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutsChunk, TimeoutStorageError> {
        let now = Utc::now();
        let timeouts = self.timeouts.lock().unwrap();
        let due_timeouts = timeouts
            .values()
            .filter(|t| t.time > start_slice && t.time <= now)
            .map(|t| DueTimeout {
                id: t.id.clone(),
                due_time: t.time,
            })
            .collect();
        let next_time_to_query = timeouts
            .values()
            .map(|t| t.time)
            .filter(|time| *time > now)
            .min()
            .unwrap_or(now + chrono::Duration::minutes(1));
        Ok(TimeoutsChunk {
            due_timeouts,
            next_time_to_query,
        })
    }
}
