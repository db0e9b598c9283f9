use tracing::info;

use crate::context::ContextBag;
use crate::handler::Message;
use crate::pipeline::{MessageOperations, ProcessingError, SendOptions};
use crate::routing::RoutingError;
use crate::transport::BoxSubscriptionManager;

/// Entry point for messaging from outside a handler.
///
/// Operations started here are not part of any receive, so they are
/// dispatched immediately.
#[derive(Clone, Debug)]
pub struct MessageSession {
    operations: MessageOperations,
    subscriptions: Option<BoxSubscriptionManager>,
}

impl MessageSession {
    pub(crate) fn new(operations: MessageOperations, subscriptions: Option<BoxSubscriptionManager>) -> Self {
        Self {
            operations,
            subscriptions,
        }
    }

    pub async fn send<M: Message>(&self, message: &M, options: SendOptions) -> Result<(), ProcessingError> {
        self.operations.send(&ContextBag::new(), message, options).await
    }

    /// Send to this endpoint's own input queue.
    pub async fn send_local<M: Message>(&self, message: &M) -> Result<(), ProcessingError> {
        self.send(message, SendOptions::new().route_to_this_endpoint()).await
    }

    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), ProcessingError> {
        self.operations
            .publish(&ContextBag::new(), message, SendOptions::new())
            .await
    }

    /// Subscribe this endpoint to events of type `M`.
    pub async fn subscribe<M: Message>(&self) -> Result<(), ProcessingError> {
        let manager = self.manager()?;
        manager.subscribe(M::MESSAGE_TYPE, &ContextBag::new()).await?;
        info!(message_type = M::MESSAGE_TYPE, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe<M: Message>(&self) -> Result<(), ProcessingError> {
        let manager = self.manager()?;
        manager.unsubscribe(M::MESSAGE_TYPE, &ContextBag::new()).await?;
        info!(message_type = M::MESSAGE_TYPE, "unsubscribed");
        Ok(())
    }

    fn manager(&self) -> Result<&BoxSubscriptionManager, RoutingError> {
        self.subscriptions
            .as_ref()
            .ok_or(RoutingError::SubscriptionsNotSupported)
    }
}
