//! Outgoing side of the transport contract.

use std::future::Future;
use std::sync::Arc;

use courier_types::error::TransportError;
use courier_types::transport::TransportOperations;

use crate::context::ContextBag;
use crate::pipeline::BoxFuture;

/// Sends batches of transport operations.
///
/// Operations with default consistency in one batch may be committed
/// atomically if the transport supports it; isolated operations never join
/// an ambient receive transaction.
pub trait DispatchMessages: Send + Sync {
    fn dispatch(
        &self,
        operations: TransportOperations,
        context: &ContextBag,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Object-safe version of [`DispatchMessages`] with boxed futures.
pub trait DispatchMessagesDyn: Send + Sync {
    fn dispatch_boxed<'a>(
        &'a self,
        operations: TransportOperations,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

impl<T: DispatchMessages> DispatchMessagesDyn for T {
    fn dispatch_boxed<'a>(
        &'a self,
        operations: TransportOperations,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.dispatch(operations, context))
    }
}

/// Type-erased, cloneable dispatcher.
#[derive(Clone)]
pub struct BoxDispatcher {
    inner: Arc<dyn DispatchMessagesDyn>,
}

impl BoxDispatcher {
    pub fn new<T: DispatchMessages + 'static>(dispatcher: T) -> Self {
        Self {
            inner: Arc::new(dispatcher),
        }
    }

    pub fn from_arc<T: DispatchMessages + 'static>(dispatcher: Arc<T>) -> Self {
        Self { inner: dispatcher }
    }

    pub async fn dispatch(
        &self,
        operations: TransportOperations,
        context: &ContextBag,
    ) -> Result<(), TransportError> {
        self.inner.dispatch_boxed(operations, context).await
    }
}

impl std::fmt::Debug for BoxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDispatcher").finish_non_exhaustive()
    }
}
