use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::context::ContextBag;
use courier_core::transport::DispatchMessages;
use courier_observe::messaging_attrs::{OP_SEND, SYSTEM_IN_MEMORY};
use courier_types::delivery::DeliveryConstraint;
use courier_types::error::TransportError;
use courier_types::message::{IncomingMessage, OutgoingMessage};
use courier_types::transport::TransportOperations;
use tracing::{Instrument, debug, info_span, warn};

use super::broker::{InMemoryBroker, InMemoryQueue, QueuedMessage};

/// Delivers transport operations to broker queues.
///
/// A batch is all-or-nothing: every destination is resolved before any
/// message is enqueued.
#[derive(Debug, Clone)]
pub struct InMemoryDispatcher {
    broker: InMemoryBroker,
}

impl InMemoryDispatcher {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }

    fn deliveries(
        &self,
        operations: TransportOperations,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Arc<InMemoryQueue>, QueuedMessage)>, TransportError> {
        let mut deliveries = Vec::with_capacity(operations.unicast.len());

        for op in operations.unicast {
            let queue = self.broker.existing_queue(&op.destination)?;
            deliveries.push((queue, queued(op.message, &op.delivery_constraints, now)?));
        }

        for op in operations.multicast {
            let subscribers = self.broker.subscribers(&op.message_type);
            if subscribers.is_empty() {
                debug!(message_type = %op.message_type, "no subscribers, publish dropped");
            }
            for subscriber in subscribers {
                let Some(queue) = self.broker.queue(&subscriber) else {
                    warn!(subscriber = %subscriber, message_type = %op.message_type, "subscriber queue does not exist, skipping");
                    continue;
                };
                deliveries.push((queue, queued(op.message.clone(), &op.delivery_constraints, now)?));
            }
        }
        Ok(deliveries)
    }
}

fn queued(
    message: OutgoingMessage,
    constraints: &[DeliveryConstraint],
    now: DateTime<Utc>,
) -> Result<QueuedMessage, TransportError> {
    let mut discard_after = None;
    for constraint in constraints {
        match constraint {
            DeliveryConstraint::DiscardIfNotReceivedBefore { time_to_be_received } => {
                let ttl = chrono::Duration::from_std(*time_to_be_received).unwrap_or(chrono::Duration::MAX);
                discard_after = Some(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC));
            }
            DeliveryConstraint::DelayDeliveryWith { .. } | DeliveryConstraint::DoNotDeliverBefore { .. } => {
                return Err(TransportError::Unsupported(format!(
                    "the in-memory transport cannot delay delivery of message '{}'",
                    message.message_id
                )));
            }
        }
    }
    let OutgoingMessage {
        message_id,
        headers,
        body,
    } = message;
    Ok(QueuedMessage {
        message: IncomingMessage::new(message_id, headers, body),
        discard_after,
    })
}

impl DispatchMessages for InMemoryDispatcher {
    async fn dispatch(&self, operations: TransportOperations, _context: &ContextBag) -> Result<(), TransportError> {
        let span = info_span!(
            "send",
            messaging.system = SYSTEM_IN_MEMORY,
            messaging.operation.type = OP_SEND,
            messaging.batch.message_count = operations.len(),
        );
        async {
            let deliveries = self.deliveries(operations, Utc::now())?;
            let count = deliveries.len();
            for (queue, message) in deliveries {
                queue.push(message);
            }
            debug!(delivered = count, "batch dispatched");
            Ok::<(), TransportError>(())
        }
        .instrument(span)
        .await
    }
}
