use courier_core::context::ContextBag;
use courier_core::transport::{CreateQueues, ManageSubscriptions, QueueBindings};
use courier_types::error::TransportError;
use tracing::info;

use super::broker::InMemoryBroker;

/// Creates every bound queue that does not exist yet.
#[derive(Debug, Clone)]
pub struct InMemoryQueueCreator {
    broker: InMemoryBroker,
}

impl InMemoryQueueCreator {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }
}

impl CreateQueues for InMemoryQueueCreator {
    async fn create_queue_if_necessary(&self, bindings: &QueueBindings, identity: &str) -> Result<(), TransportError> {
        let addresses = bindings
            .receiving_addresses()
            .iter()
            .chain(bindings.sending_addresses());
        for address in addresses {
            if self.broker.create_queue(address) {
                info!(queue = %address, identity, "queue created");
            }
        }
        Ok(())
    }
}

/// Native subscriptions of one endpoint's input queue.
#[derive(Debug, Clone)]
pub struct InMemorySubscriptionManager {
    broker: InMemoryBroker,
    subscriber: String,
}

impl InMemorySubscriptionManager {
    pub fn new(broker: InMemoryBroker, subscriber: impl Into<String>) -> Self {
        Self {
            broker,
            subscriber: subscriber.into(),
        }
    }
}

impl ManageSubscriptions for InMemorySubscriptionManager {
    async fn subscribe(&self, message_type: &str, _context: &ContextBag) -> Result<(), TransportError> {
        self.broker.subscribe(message_type, &self.subscriber);
        Ok(())
    }

    async fn unsubscribe(&self, message_type: &str, _context: &ContextBag) -> Result<(), TransportError> {
        self.broker.unsubscribe(message_type, &self.subscriber);
        Ok(())
    }
}
