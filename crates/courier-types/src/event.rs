//! Recoverability notifications published for external monitoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Headers;

/// Snapshot of an error, detached from the error value itself so it can be
/// cloned into notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub exception_type: String,
    pub message: String,
    pub stack_trace: String,
}

/// Events raised by the recoverability stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoverabilityEvent {
    /// A failed receive was handed back for an immediate retry.
    FirstLevelRetryAttempted {
        message_id: String,
        /// Zero-based: the first retry reports 0.
        retry_attempt: u32,
        failure: FailureInfo,
    },
    /// A message was forwarded to the error queue.
    MessageSentToErrorQueue {
        message_id: String,
        error_queue: String,
        headers: Headers,
        body: Vec<u8>,
        failure: FailureInfo,
        at: DateTime<Utc>,
    },
}

impl RecoverabilityEvent {
    pub fn message_id(&self) -> &str {
        match self {
            Self::FirstLevelRetryAttempted { message_id, .. }
            | Self::MessageSentToErrorQueue { message_id, .. } => message_id,
        }
    }
}
