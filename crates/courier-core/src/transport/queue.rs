use std::future::Future;
use std::sync::Arc;

use courier_types::error::TransportError;

use crate::pipeline::BoxFuture;

/// Queues an endpoint receives from and sends to, collected during startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBindings {
    receiving: Vec<String>,
    sending: Vec<String>,
}

impl QueueBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_receiving(&mut self, address: impl Into<String>) -> &mut Self {
        let address = address.into();
        if !self.receiving.contains(&address) {
            self.receiving.push(address);
        }
        self
    }

    pub fn bind_sending(&mut self, address: impl Into<String>) -> &mut Self {
        let address = address.into();
        if !self.sending.contains(&address) {
            self.sending.push(address);
        }
        self
    }

    pub fn receiving_addresses(&self) -> &[String] {
        &self.receiving
    }

    pub fn sending_addresses(&self) -> &[String] {
        &self.sending
    }
}

/// Creates the queues an endpoint needs before its pumps start.
pub trait CreateQueues: Send + Sync {
    fn create_queue_if_necessary(
        &self,
        bindings: &QueueBindings,
        identity: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Object-safe version of [`CreateQueues`] with boxed futures.
pub trait CreateQueuesDyn: Send + Sync {
    fn create_queue_if_necessary_boxed<'a>(
        &'a self,
        bindings: &'a QueueBindings,
        identity: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

impl<T: CreateQueues> CreateQueuesDyn for T {
    fn create_queue_if_necessary_boxed<'a>(
        &'a self,
        bindings: &'a QueueBindings,
        identity: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.create_queue_if_necessary(bindings, identity))
    }
}

/// Type-erased queue creator.
#[derive(Clone)]
pub struct BoxQueueCreator {
    inner: Arc<dyn CreateQueuesDyn>,
}

impl BoxQueueCreator {
    pub fn new<T: CreateQueues + 'static>(creator: T) -> Self {
        Self {
            inner: Arc::new(creator),
        }
    }

    pub async fn create_queue_if_necessary(
        &self,
        bindings: &QueueBindings,
        identity: &str,
    ) -> Result<(), TransportError> {
        self.inner
            .create_queue_if_necessary_boxed(bindings, identity)
            .await
    }
}
