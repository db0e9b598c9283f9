//! Stage results and processing errors.
//!
//! Every stage of every pipeline resolves to a [`StageResult`]. Errors carry
//! the cause of a failed receive outward through the chain so the
//! recoverability stages can decide what to do with the message.

use std::error::Error as StdError;
use std::fmt;

use courier_types::error::{ConfigurationError, TransportError};
use courier_types::event::FailureInfo;
use thiserror::Error;

use crate::routing::RoutingError;
use crate::timeout::TimeoutStorageError;

/// Result of running a pipeline, or any suffix of one.
pub type StageResult = Result<ProcessingOutcome, ProcessingError>;

/// How a receive ended when it did not fail.
#[derive(Debug)]
pub enum ProcessingOutcome {
    /// Processing finished; the transport should commit the receive.
    Completed,
    /// A recoverability stage asked the transport to hand the message back
    /// for another attempt.
    RetryRequested,
    /// The message failed but was forwarded to the error queue, so the
    /// transport should commit the receive.
    MovedToErrorQueue { error: ProcessingError },
}

impl ProcessingOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_retry_requested(&self) -> bool {
        matches!(self, Self::RetryRequested)
    }

    /// Whether the transport should consume the message.
    pub fn should_commit(&self) -> bool {
        !self.is_retry_requested()
    }
}

/// Errors raised while processing or dispatching a message.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The body could not be turned into a logical message. Never retried.
    #[error("failed to deserialize message '{message_id}': {reason}")]
    Deserialization { message_id: String, reason: String },

    /// A message handler failed.
    #[error(transparent)]
    Handler(anyhow::Error),

    #[error("no handlers could be found for message type '{0}'")]
    NoHandlers(String),

    /// The message is structurally unusable for the stage that received it.
    #[error("{reason} (message '{message_id}')")]
    InvalidMessage { message_id: String, reason: String },

    #[error("failed to serialize outgoing message: {0}")]
    Serialization(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] TimeoutStorageError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl ProcessingError {
    /// Wrap a handler failure message.
    pub fn handler(message: impl fmt::Display) -> Self {
        Self::Handler(anyhow::anyhow!("{message}"))
    }

    pub fn is_deserialization(&self) -> bool {
        matches!(self, Self::Deserialization { .. })
    }

    /// Short name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deserialization { .. } => "Deserialization",
            Self::Handler(_) => "Handler",
            Self::NoHandlers(_) => "NoHandlers",
            Self::InvalidMessage { .. } => "InvalidMessage",
            Self::Serialization(_) => "Serialization",
            Self::Routing(_) => "Routing",
            Self::Transport(_) => "Transport",
            Self::Storage(_) => "Storage",
            Self::Configuration(_) => "Configuration",
        }
    }

    /// Value written to the exception-type header of a failed message.
    pub fn exception_type(&self) -> String {
        format!("courier::ProcessingError::{}", self.kind())
    }

    /// Display of the first underlying cause, if any.
    pub fn inner_cause(&self) -> Option<String> {
        self.source().map(|source| source.to_string())
    }

    /// The error and its chain of causes, one per line.
    pub fn stack_trace(&self) -> String {
        let mut trace = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }

    /// Detached snapshot for notifications.
    pub fn failure_info(&self) -> FailureInfo {
        FailureInfo {
            exception_type: self.exception_type(),
            message: self.to_string(),
            stack_trace: self.stack_trace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_displays_the_message_text() {
        let err = ProcessingError::handler("Simulated exception");
        assert_eq!(err.to_string(), "Simulated exception");
        assert_eq!(err.kind(), "Handler");
        assert!(!err.is_deserialization());
    }

    #[test]
    fn stack_trace_walks_the_cause_chain() {
        let inner = anyhow::anyhow!("connection reset").context("could not load order");
        let err = ProcessingError::Handler(inner);
        let trace = err.stack_trace();
        assert!(trace.starts_with("could not load order"));
        assert!(trace.contains("caused by: connection reset"));
        assert_eq!(err.inner_cause().as_deref(), Some("connection reset"));
    }

    #[test]
    fn failure_info_snapshot() {
        let err = ProcessingError::Deserialization {
            message_id: "m-1".into(),
            reason: "expected value".into(),
        };
        let info = err.failure_info();
        assert_eq!(
            info.exception_type,
            "courier::ProcessingError::Deserialization"
        );
        assert_eq!(
            info.message,
            "failed to deserialize message 'm-1': expected value"
        );
        assert!(err.is_deserialization());
    }

    #[test]
    fn only_retry_requested_skips_commit() {
        assert!(ProcessingOutcome::Completed.should_commit());
        assert!(!ProcessingOutcome::RetryRequested.should_commit());
        let moved = ProcessingOutcome::MovedToErrorQueue {
            error: ProcessingError::handler("boom"),
        };
        assert!(moved.should_commit());
    }
}
