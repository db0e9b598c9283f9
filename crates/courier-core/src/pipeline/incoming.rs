//! Built-in stages of the incoming pipeline.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use courier_types::transport::TransportOperations;
use futures_util::FutureExt;
use tracing::{debug, trace};

use super::contexts::{IncomingLogicalContext, InvokeHandlerContext, TransportReceiveContext};
use super::error::{ProcessingError, ProcessingOutcome, StageResult};
use super::operations::MessageOperations;
use super::outgoing::PendingTransportOperations;
use super::stage::{Connector, NextStage, Terminator};
use crate::handler::HandlerRegistry;
use crate::serialization::{LogicalMessage, MessageSerializer};
use crate::transport::BoxDispatcher;

/// Turns a raw transport message into a logical message.
///
/// Control messages complete without running the logical segment. Messages
/// sent by handlers while the logical segment runs are collected and only
/// dispatched, as one batch, once it succeeds.
pub struct DeserializeConnector {
    serializer: Arc<dyn MessageSerializer>,
    dispatcher: BoxDispatcher,
}

impl DeserializeConnector {
    pub fn new(serializer: Arc<dyn MessageSerializer>, dispatcher: BoxDispatcher) -> Self {
        Self {
            serializer,
            dispatcher,
        }
    }
}

impl Connector for DeserializeConnector {
    type Upstream = TransportReceiveContext;
    type Downstream = IncomingLogicalContext;

    async fn connect(
        &self,
        context: &mut TransportReceiveContext,
        next: NextStage<IncomingLogicalContext>,
    ) -> StageResult {
        let message = context.message();
        let message_id = message.message_id.clone();

        if message.is_control_message() {
            debug!(%message_id, "control message received, nothing to deserialize");
            return Ok(ProcessingOutcome::Completed);
        }

        let message_type = message
            .enclosed_message_type()
            .ok_or_else(|| ProcessingError::Deserialization {
                message_id: message_id.clone(),
                reason: "the enclosed message types header is missing".into(),
            })?
            .to_string();
        let body = self
            .serializer
            .deserialize(&message.body)
            .map_err(|e| ProcessingError::Deserialization {
                message_id: message_id.clone(),
                reason: e.to_string(),
            })?;

        let pending = PendingTransportOperations::default();
        let extensions = context.extensions.child();
        extensions.set(pending.clone());
        extensions.set(context.shared_message());

        let mut logical = IncomingLogicalContext {
            message_id,
            headers: message.headers.clone(),
            message: LogicalMessage::new(message_type, body),
            extensions,
        };
        let outcome = next.run(&mut logical).await?;
        drop(logical);

        let batch = pending.take();
        if !outcome.should_commit() {
            if !batch.is_empty() {
                debug!(operations = batch.len(), "receive not committed, batched operations dropped");
            }
            return Ok(outcome);
        }
        if !batch.is_empty() {
            trace!(operations = batch.len(), "dispatching batched operations");
            self.dispatcher
                .dispatch(TransportOperations::new(batch), &context.extensions)
                .await?;
        }
        Ok(outcome)
    }
}

/// Runs the handler segment once per handler registered for the message type.
pub struct LoadHandlersConnector {
    handlers: Arc<HandlerRegistry>,
    operations: MessageOperations,
}

impl LoadHandlersConnector {
    pub fn new(handlers: Arc<HandlerRegistry>, operations: MessageOperations) -> Self {
        Self {
            handlers,
            operations,
        }
    }
}

impl Connector for LoadHandlersConnector {
    type Upstream = IncomingLogicalContext;
    type Downstream = InvokeHandlerContext;

    async fn connect(
        &self,
        context: &mut IncomingLogicalContext,
        next: NextStage<InvokeHandlerContext>,
    ) -> StageResult {
        let handlers = self.handlers.handlers_for(&context.message.message_type);
        if handlers.is_empty() {
            return Err(ProcessingError::NoHandlers(
                context.message.message_type.clone(),
            ));
        }

        for handler in handlers {
            let mut invocation =
                InvokeHandlerContext::new(handler.clone(), context, self.operations.clone());
            let outcome = next.run(&mut invocation).await?;
            if !outcome.is_completed() {
                return Ok(outcome);
            }
            if invocation.handler_invocation_aborted() {
                debug!(
                    message_id = %context.message_id,
                    handler = handler.name(),
                    "handler stopped dispatch to remaining handlers"
                );
                break;
            }
        }
        Ok(ProcessingOutcome::Completed)
    }
}

/// Calls the handler carried by the context.
pub struct InvokeHandlerTerminator;

impl Terminator for InvokeHandlerTerminator {
    type Context = InvokeHandlerContext;

    async fn terminate(&self, context: &mut InvokeHandlerContext) -> StageResult {
        let handler = context.handler.clone();
        let body = context.message.body.clone();
        trace!(message_id = %context.message_id, handler = handler.name(), "invoking handler");
        match AssertUnwindSafe(handler.invoke(body, context)).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => {
                return Err(ProcessingError::Handler(anyhow::anyhow!(
                    "handler '{}' panicked: {}",
                    handler.name(),
                    panic_message(panic.as_ref())
                )));
            }
        }
        Ok(ProcessingOutcome::Completed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
