//! Entry points into the outgoing pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_types::delivery::DeliveryConstraint;
use courier_types::headers;
use courier_types::message::{Headers, MessageIntent, OutgoingMessage};
use courier_types::routing::RoutingStrategy;
use courier_types::wire::to_wire_format;
use tracing::debug;
use uuid::Uuid;

use super::chain::Pipeline;
use super::contexts::{OutgoingLogicalContext, RoutingContext};
use super::error::ProcessingError;
use crate::context::ContextBag;
use crate::handler::Message;
use crate::serialization::LogicalMessage;

/// Per-operation options for send, publish and reply.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Explicit transport address. Overrides the route table.
    pub destination: Option<String>,
    pub route_to_this_endpoint: bool,
    pub delivery_constraints: Vec<DeliveryConstraint>,
    pub headers: Headers,
    /// Use this id instead of generating one.
    pub message_id: Option<String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn route_to_this_endpoint(mut self) -> Self {
        self.route_to_this_endpoint = true;
        self
    }

    pub fn delay_delivery_with(mut self, delay: Duration) -> Self {
        self.delivery_constraints
            .push(DeliveryConstraint::DelayDeliveryWith { delay });
        self
    }

    pub fn do_not_deliver_before(mut self, at: DateTime<Utc>) -> Self {
        self.delivery_constraints
            .push(DeliveryConstraint::DoNotDeliverBefore { at });
        self
    }

    pub fn discard_if_not_received_before(mut self, time_to_be_received: Duration) -> Self {
        self.delivery_constraints
            .push(DeliveryConstraint::DiscardIfNotReceivedBefore { time_to_be_received });
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

struct OperationsInner {
    outgoing: Arc<Pipeline<OutgoingLogicalContext>>,
    routing: Arc<Pipeline<RoutingContext>>,
    endpoint_name: String,
    /// `None` for send-only endpoints.
    local_address: Option<String>,
}

/// Cloneable handle that feeds messages into the outgoing pipeline.
#[derive(Clone)]
pub struct MessageOperations {
    inner: Arc<OperationsInner>,
}

impl MessageOperations {
    pub fn new(
        outgoing: Arc<Pipeline<OutgoingLogicalContext>>,
        routing: Arc<Pipeline<RoutingContext>>,
        endpoint_name: impl Into<String>,
        local_address: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(OperationsInner {
                outgoing,
                routing,
                endpoint_name: endpoint_name.into(),
                local_address,
            }),
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.inner.endpoint_name
    }

    pub fn local_address(&self) -> Option<&str> {
        self.inner.local_address.as_deref()
    }

    pub async fn send<M: Message>(
        &self,
        parent: &ContextBag,
        message: &M,
        options: SendOptions,
    ) -> Result<(), ProcessingError> {
        self.dispatch(parent, MessageIntent::Send, message, options)
            .await
    }

    pub async fn publish<M: Message>(
        &self,
        parent: &ContextBag,
        message: &M,
        options: SendOptions,
    ) -> Result<(), ProcessingError> {
        self.dispatch(parent, MessageIntent::Publish, message, options)
            .await
    }

    pub async fn reply<M: Message>(
        &self,
        parent: &ContextBag,
        message: &M,
        options: SendOptions,
    ) -> Result<(), ProcessingError> {
        self.dispatch(parent, MessageIntent::Reply, message, options)
            .await
    }

    /// Route an already physical message to `destination`, bypassing
    /// serialization.
    pub async fn forward(
        &self,
        parent: &ContextBag,
        message: OutgoingMessage,
        destination: &str,
    ) -> Result<(), ProcessingError> {
        debug!(message_id = %message.message_id, destination, "forwarding message");
        let mut context =
            RoutingContext::new(message, vec![RoutingStrategy::unicast(destination)], parent);
        self.inner.routing.invoke(&mut context).await?;
        Ok(())
    }

    async fn dispatch<M: Message>(
        &self,
        parent: &ContextBag,
        intent: MessageIntent,
        message: &M,
        options: SendOptions,
    ) -> Result<(), ProcessingError> {
        let body = serde_json::to_value(message)
            .map_err(|e| ProcessingError::Serialization(e.to_string()))?;
        let message_id = options
            .message_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut headers = options.headers;
        headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        headers.insert(
            headers::ORIGINATING_ENDPOINT.to_string(),
            self.inner.endpoint_name.clone(),
        );
        headers.insert(headers::TIME_SENT.to_string(), to_wire_format(Utc::now()));
        headers
            .entry(headers::CORRELATION_ID.to_string())
            .or_insert_with(|| message_id.clone());
        if let Some(local) = &self.inner.local_address {
            headers
                .entry(headers::REPLY_TO_ADDRESS.to_string())
                .or_insert_with(|| local.clone());
        }

        let mut context = OutgoingLogicalContext {
            message_id,
            intent,
            message: LogicalMessage::new(M::MESSAGE_TYPE, body),
            headers,
            destination: options.destination,
            route_to_this_endpoint: options.route_to_this_endpoint,
            delivery_constraints: options.delivery_constraints,
            routing_strategies: Vec::new(),
            extensions: parent.child(),
        };
        self.inner.outgoing.invoke(&mut context).await?;
        Ok(())
    }
}

impl std::fmt::Debug for MessageOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageOperations")
            .field("endpoint_name", &self.inner.endpoint_name)
            .field("local_address", &self.inner.local_address)
            .finish()
    }
}
