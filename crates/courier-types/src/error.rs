use thiserror::Error;

use crate::delivery::DeliveryConstraintKind;
use crate::transport::TransportTransactionMode;

/// Configuration-time incompatibilities. Any of these stops the endpoint
/// from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error(
        "Requested transaction mode `{requested}` can't be satisfied since the transport only supports `{supported}`"
    )]
    UnsupportedTransactionMode {
        requested: TransportTransactionMode,
        supported: TransportTransactionMode,
    },

    #[error("delivery constraint `{0}` is not supported by the transport")]
    UnsupportedDeliveryConstraint(DeliveryConstraintKind),

    #[error("step '{0}' is registered more than once")]
    DuplicateStep(String),

    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    #[error("cannot replace step '{0}': no step with that id is registered")]
    ReplaceUnknownStep(String),

    #[error("pipeline ordering cycle: {0}")]
    CycleDetected(String),

    #[error("Pre start-up check failed: {0}")]
    PreStartupCheckFailed(String),

    #[error("transport does not support receiving, but the endpoint is not send-only")]
    ReceiveNotSupported,

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// Errors raised by transport adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("message pump is not initialized")]
    NotInitialized,

    #[error("message pump failed to stop within the time allowed ({0:?})")]
    StopTimeout(std::time::Duration),

    #[error("transport operation not supported: {0}")]
    Unsupported(String),
}
