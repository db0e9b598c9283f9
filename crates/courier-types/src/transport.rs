//! Transport-facing value types: transaction modes, dispatch operations,
//! and message pump settings.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryConstraint, DeliveryConstraintKind};
use crate::message::OutgoingMessage;
use crate::routing::{OutboundRoutingPolicy, RoutingStrategy};

/// Transactional guarantee a transport offers for receive + dispatch.
///
/// The derive order is the strength order:
/// `None < ReceiveOnly < SendsAtomicWithReceive < TransactionScope`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportTransactionMode {
    None,
    ReceiveOnly,
    SendsAtomicWithReceive,
    TransactionScope,
}

impl fmt::Display for TransportTransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::ReceiveOnly => "ReceiveOnly",
            Self::SendsAtomicWithReceive => "SendsAtomicWithReceive",
            Self::TransactionScope => "TransactionScope",
        };
        f.write_str(name)
    }
}

/// Whether an operation may join the ambient receive transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DispatchConsistency {
    /// Enlist in the receive transaction when the transport supports it.
    #[default]
    Default,
    /// Dispatch independently of any receive transaction.
    Isolated,
}

/// One outgoing message bound to one routing strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOperation {
    pub message: OutgoingMessage,
    pub routing: RoutingStrategy,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub consistency: DispatchConsistency,
}

impl TransportOperation {
    pub fn new(message: OutgoingMessage, routing: RoutingStrategy) -> Self {
        Self {
            message,
            routing,
            delivery_constraints: Vec::new(),
            consistency: DispatchConsistency::Default,
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<DeliveryConstraint>) -> Self {
        self.delivery_constraints = constraints;
        self
    }

    pub fn with_consistency(mut self, consistency: DispatchConsistency) -> Self {
        self.consistency = consistency;
        self
    }
}

/// A unicast operation as seen by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicastTransportOperation {
    pub message: OutgoingMessage,
    pub destination: String,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub consistency: DispatchConsistency,
}

/// A multicast operation as seen by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastTransportOperation {
    pub message: OutgoingMessage,
    pub message_type: String,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub consistency: DispatchConsistency,
}

/// A batch of operations handed to a dispatcher in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOperations {
    pub unicast: Vec<UnicastTransportOperation>,
    pub multicast: Vec<MulticastTransportOperation>,
}

impl TransportOperations {
    pub fn new(operations: impl IntoIterator<Item = TransportOperation>) -> Self {
        let mut batch = Self::default();
        for op in operations {
            batch.push(op);
        }
        batch
    }

    pub fn push(&mut self, operation: TransportOperation) {
        let TransportOperation {
            message,
            routing,
            delivery_constraints,
            consistency,
        } = operation;
        match routing {
            RoutingStrategy::Unicast { destination } => {
                self.unicast.push(UnicastTransportOperation {
                    message,
                    destination,
                    delivery_constraints,
                    consistency,
                })
            }
            RoutingStrategy::Multicast { message_type } => {
                self.multicast.push(MulticastTransportOperation {
                    message,
                    message_type,
                    delivery_constraints,
                    consistency,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.unicast.len() + self.multicast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unicast.is_empty() && self.multicast.is_empty()
    }
}

/// Capabilities a transport declares once it has been initialized.
///
/// Computed once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub transaction_mode: TransportTransactionMode,
    pub outbound_routing_policy: OutboundRoutingPolicy,
    pub delivery_constraints: HashSet<DeliveryConstraintKind>,
}

impl TransportCapabilities {
    pub fn supports(&self, kind: DeliveryConstraintKind) -> bool {
        self.delivery_constraints.contains(&kind)
    }

    /// Whether the transport can defer delivery without a timeout manager.
    pub fn supports_delayed_delivery(&self) -> bool {
        self.supports(DeliveryConstraintKind::DelayDeliveryWith)
    }
}

/// Settings handed to a message pump during `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub input_queue: String,
    pub error_queue: String,
    pub purge_on_startup: bool,
    pub required_transaction_mode: TransportTransactionMode,
}

/// Runtime limits a message pump must honour once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushRuntimeSettings {
    pub max_concurrency: usize,
}

impl PushRuntimeSettings {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }
}

impl Default for PushRuntimeSettings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cpus.max(2))
    }
}

/// Outcome of a transport's pre-startup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupCheckResult {
    Success,
    Failed(String),
}

impl StartupCheckResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
