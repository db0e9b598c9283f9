//! Context types flowing through each pipeline segment.
//!
//! Every context owns a [`ContextBag`] scope. Connectors create the next
//! context with a child scope of the current one, so values placed by outer
//! stages stay readable further in.
//!
//! Incoming: `TransportReceiveContext` -> `IncomingLogicalContext` ->
//! `InvokeHandlerContext` (once per handler).
//!
//! Outgoing: `OutgoingLogicalContext` -> `OutgoingPhysicalContext` ->
//! `RoutingContext`. Failed messages enter through `FaultContext`, which
//! also connects to `RoutingContext`.

use std::sync::Arc;

use courier_types::delivery::DeliveryConstraint;
use courier_types::headers;
use courier_types::message::{Headers, IncomingMessage, MessageIntent, OutgoingMessage};
use courier_types::routing::RoutingStrategy;
use courier_types::transport::DispatchConsistency;

use super::error::ProcessingError;
use super::operations::{MessageOperations, SendOptions};
use crate::context::ContextBag;
use crate::handler::{BoxHandler, Message};
use crate::routing::RoutingError;
use crate::serialization::LogicalMessage;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A context that carries an extension bag.
pub trait ExtendableContext {
    fn extensions(&self) -> &ContextBag;
}

/// A context that refers to one specific message.
pub trait MessageContext: ExtendableContext {
    fn message_id(&self) -> &str;
    fn headers(&self) -> &Headers;
}

macro_rules! extendable {
    ($($context:ty),+ $(,)?) => {
        $(
            impl ExtendableContext for $context {
                fn extensions(&self) -> &ContextBag {
                    &self.extensions
                }
            }
        )+
    };
}

extendable!(
    TransportReceiveContext,
    IncomingLogicalContext,
    InvokeHandlerContext,
    OutgoingLogicalContext,
    OutgoingPhysicalContext,
    RoutingContext,
    FaultContext,
);

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// A raw message as received from the transport.
///
/// The message is shared copy-on-write: recoverability stages that add
/// headers get their own copy only if a downstream stage still holds one.
#[derive(Debug)]
pub struct TransportReceiveContext {
    message: Arc<IncomingMessage>,
    pub extensions: ContextBag,
}

impl TransportReceiveContext {
    /// A fresh context in a child scope of `parent`.
    pub fn new(message: IncomingMessage, parent: &ContextBag) -> Self {
        Self {
            message: Arc::new(message),
            extensions: parent.child(),
        }
    }

    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut IncomingMessage {
        Arc::make_mut(&mut self.message)
    }

    pub(crate) fn shared_message(&self) -> Arc<IncomingMessage> {
        Arc::clone(&self.message)
    }
}

impl MessageContext for TransportReceiveContext {
    fn message_id(&self) -> &str {
        &self.message.message_id
    }

    fn headers(&self) -> &Headers {
        &self.message.headers
    }
}

/// A deserialized message ready for handler lookup.
#[derive(Debug)]
pub struct IncomingLogicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
    pub extensions: ContextBag,
}

impl MessageContext for IncomingLogicalContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// One handler invocation for one logical message.
///
/// Handlers use this context to send further messages. Those sends are
/// batched and only dispatched once every handler for the message has
/// succeeded.
pub struct InvokeHandlerContext {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
    pub handler: BoxHandler,
    pub extensions: ContextBag,
    operations: MessageOperations,
    dispatch_aborted: bool,
}

impl InvokeHandlerContext {
    pub fn new(
        handler: BoxHandler,
        parent: &IncomingLogicalContext,
        operations: MessageOperations,
    ) -> Self {
        Self {
            message_id: parent.message_id.clone(),
            headers: parent.headers.clone(),
            message: parent.message.clone(),
            handler,
            extensions: parent.extensions.child(),
            operations,
            dispatch_aborted: false,
        }
    }

    pub fn reply_to_address(&self) -> Option<&str> {
        self.headers
            .get(headers::REPLY_TO_ADDRESS)
            .map(String::as_str)
    }

    /// Send `message` using static routes or an explicit destination.
    pub async fn send<M: Message>(&self, message: &M, options: SendOptions) -> Result<(), ProcessingError> {
        self.operations
            .send(&self.extensions, message, self.correlated(options))
            .await
    }

    /// Send `message` to this endpoint's own input queue.
    pub async fn send_local<M: Message>(&self, message: &M) -> Result<(), ProcessingError> {
        let options = SendOptions::new().route_to_this_endpoint();
        self.send(message, options).await
    }

    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), ProcessingError> {
        self.operations
            .publish(&self.extensions, message, self.correlated(SendOptions::new()))
            .await
    }

    /// Reply to the sender of the message being handled.
    pub async fn reply<M: Message>(&self, message: &M) -> Result<(), ProcessingError> {
        let destination = self
            .reply_to_address()
            .ok_or_else(|| RoutingError::NoReplyToAddress(self.message_id.clone()))?;
        let options = self.correlated(SendOptions::new().to(destination));
        self.operations.reply(&self.extensions, message, options).await
    }

    /// Dispatch the incoming message, unchanged, to `destination`.
    pub async fn forward_current_message_to(&self, destination: &str) -> Result<(), ProcessingError> {
        let incoming = self
            .extensions
            .get::<Arc<IncomingMessage>>()
            .ok_or_else(|| ProcessingError::InvalidMessage {
                message_id: self.message_id.clone(),
                reason: "the physical message is not available for forwarding".into(),
            })?;
        self.operations
            .forward(&self.extensions, OutgoingMessage::from_incoming(&incoming), destination)
            .await
    }

    /// Skip every handler after the current one for this message.
    pub fn do_not_continue_dispatching_current_message_to_handlers(&mut self) {
        self.dispatch_aborted = true;
    }

    pub fn handler_invocation_aborted(&self) -> bool {
        self.dispatch_aborted
    }

    fn correlated(&self, mut options: SendOptions) -> SendOptions {
        let correlation_id = self
            .headers
            .get(headers::CORRELATION_ID)
            .cloned()
            .unwrap_or_else(|| self.message_id.clone());
        options
            .headers
            .entry(headers::CORRELATION_ID.to_string())
            .or_insert(correlation_id);
        options
    }
}

impl MessageContext for InvokeHandlerContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

impl std::fmt::Debug for InvokeHandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeHandlerContext")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message.message_type)
            .field("handler", &self.handler)
            .field("dispatch_aborted", &self.dispatch_aborted)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// A logical message on its way out, before serialization.
#[derive(Debug)]
pub struct OutgoingLogicalContext {
    pub message_id: String,
    pub intent: MessageIntent,
    pub message: LogicalMessage,
    pub headers: Headers,
    /// Explicit transport address, bypassing the route table.
    pub destination: Option<String>,
    pub route_to_this_endpoint: bool,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    /// Filled by routing resolution unless a stage set it earlier.
    pub routing_strategies: Vec<RoutingStrategy>,
    pub extensions: ContextBag,
}

impl MessageContext for OutgoingLogicalContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// A serialized message on its way out.
#[derive(Debug)]
pub struct OutgoingPhysicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub routing_strategies: Vec<RoutingStrategy>,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub extensions: ContextBag,
}

impl MessageContext for OutgoingPhysicalContext {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// A transport message plus where and how to dispatch it.
#[derive(Debug)]
pub struct RoutingContext {
    pub message: OutgoingMessage,
    pub routing_strategies: Vec<RoutingStrategy>,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub consistency: DispatchConsistency,
    pub extensions: ContextBag,
}

impl RoutingContext {
    pub fn new(
        message: OutgoingMessage,
        routing_strategies: Vec<RoutingStrategy>,
        parent: &ContextBag,
    ) -> Self {
        Self {
            message,
            routing_strategies,
            delivery_constraints: Vec::new(),
            consistency: DispatchConsistency::Default,
            extensions: parent.child(),
        }
    }
}

impl MessageContext for RoutingContext {
    fn message_id(&self) -> &str {
        &self.message.message_id
    }

    fn headers(&self) -> &Headers {
        &self.message.headers
    }
}

/// A failed message to be forwarded to the error queue.
#[derive(Debug)]
pub struct FaultContext {
    pub message: OutgoingMessage,
    pub error_queue: String,
    pub extensions: ContextBag,
}

impl FaultContext {
    pub fn new(message: OutgoingMessage, error_queue: impl Into<String>, parent: &ContextBag) -> Self {
        Self {
            message,
            error_queue: error_queue.into(),
            extensions: parent.child(),
        }
    }
}

impl MessageContext for FaultContext {
    fn message_id(&self) -> &str {
        &self.message.message_id
    }

    fn headers(&self) -> &Headers {
        &self.message.headers
    }
}
