use std::future::Future;
use std::sync::Arc;

use courier_types::error::TransportError;

use crate::context::ContextBag;
use crate::pipeline::BoxFuture;

/// Native publish/subscribe management for transports with multicast.
pub trait ManageSubscriptions: Send + Sync {
    fn subscribe(
        &self,
        message_type: &str,
        context: &ContextBag,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn unsubscribe(
        &self,
        message_type: &str,
        context: &ContextBag,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Object-safe version of [`ManageSubscriptions`] with boxed futures.
pub trait ManageSubscriptionsDyn: Send + Sync {
    fn subscribe_boxed<'a>(
        &'a self,
        message_type: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn unsubscribe_boxed<'a>(
        &'a self,
        message_type: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

impl<T: ManageSubscriptions> ManageSubscriptionsDyn for T {
    fn subscribe_boxed<'a>(
        &'a self,
        message_type: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.subscribe(message_type, context))
    }

    fn unsubscribe_boxed<'a>(
        &'a self,
        message_type: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.unsubscribe(message_type, context))
    }
}

/// Type-erased subscription manager.
#[derive(Clone)]
pub struct BoxSubscriptionManager {
    inner: Arc<dyn ManageSubscriptionsDyn>,
}

impl BoxSubscriptionManager {
    pub fn new<T: ManageSubscriptions + 'static>(manager: T) -> Self {
        Self {
            inner: Arc::new(manager),
        }
    }

    pub async fn subscribe(&self, message_type: &str, context: &ContextBag) -> Result<(), TransportError> {
        self.inner.subscribe_boxed(message_type, context).await
    }

    pub async fn unsubscribe(&self, message_type: &str, context: &ContextBag) -> Result<(), TransportError> {
        self.inner.unsubscribe_boxed(message_type, context).await
    }
}

impl std::fmt::Debug for BoxSubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxSubscriptionManager").finish_non_exhaustive()
    }
}
