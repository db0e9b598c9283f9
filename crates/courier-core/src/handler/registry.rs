use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::pipeline::contexts::InvokeHandlerContext;
use crate::pipeline::{BoxFuture, ProcessingError};

/// A type that travels as a message body.
///
/// `MESSAGE_TYPE` is written to the enclosed-message-types header and used
/// to find handlers on the receiving side.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// User code that processes messages of type `M`.
pub trait Handler<M: Message>: Send + Sync {
    fn handle(
        &self,
        message: M,
        context: &mut InvokeHandlerContext,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Object-safe handler over logical message bodies.
pub trait HandlerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn handle_boxed<'a>(
        &'a self,
        body: serde_json::Value,
        context: &'a mut InvokeHandlerContext,
    ) -> BoxFuture<'a, Result<(), ProcessingError>>;
}

struct TypedHandler<M, H> {
    handler: H,
    name: &'static str,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message, H: Handler<M>> HandlerDyn for TypedHandler<M, H> {
    fn name(&self) -> &str {
        self.name
    }

    fn handle_boxed<'a>(
        &'a self,
        body: serde_json::Value,
        context: &'a mut InvokeHandlerContext,
    ) -> BoxFuture<'a, Result<(), ProcessingError>> {
        Box::pin(async move {
            let message: M = serde_json::from_value(body).map_err(|e| {
                ProcessingError::Deserialization {
                    message_id: context.message_id.clone(),
                    reason: format!("body is not a valid {}: {e}", M::MESSAGE_TYPE),
                }
            })?;
            self.handler
                .handle(message, context)
                .await
                .map_err(ProcessingError::Handler)
        })
    }
}

/// Shared, type-erased handler.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn HandlerDyn>,
}

impl BoxHandler {
    pub fn new<M: Message, H: Handler<M> + 'static>(handler: H) -> Self {
        Self {
            inner: Arc::new(TypedHandler {
                handler,
                name: std::any::type_name::<H>(),
                _message: PhantomData::<fn() -> M>,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(
        &self,
        body: serde_json::Value,
        context: &mut InvokeHandlerContext,
    ) -> Result<(), ProcessingError> {
        self.inner.handle_boxed(body, context).await
    }
}

impl std::fmt::Debug for BoxHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxHandler").field(&self.name()).finish()
    }
}

/// Handlers by message type, in registration order.
///
/// Built during configuration and read-only once the endpoint starts.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<BoxHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers
            .entry(M::MESSAGE_TYPE.to_string())
            .or_default()
            .push(BoxHandler::new::<M, H>(handler));
        self
    }

    pub fn handlers_for(&self, message_type: &str) -> &[BoxHandler] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every message type with at least one handler, sorted.
    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
