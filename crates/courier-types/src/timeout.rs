//! Records persisted by the timeout manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Headers;

/// A deferred message waiting in timeout storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutData {
    /// Opaque storage key.
    pub id: String,
    /// Transport address the message is sent to once due.
    pub destination: String,
    /// Original message body.
    pub state: Vec<u8>,
    /// When the message becomes due.
    pub time: DateTime<Utc>,
    /// Original message headers.
    pub headers: Headers,
    /// Address of the timeout manager that stored the record.
    pub owning_timeout_manager: String,
}

/// A timeout that is due, as returned by a storage query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimeout {
    pub id: String,
    pub due_time: DateTime<Utc>,
}

/// Result of one storage poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutsChunk {
    pub due_timeouts: Vec<DueTimeout>,
    /// When the storage expects the next timeout to become due.
    pub next_time_to_query: DateTime<Utc>,
}
