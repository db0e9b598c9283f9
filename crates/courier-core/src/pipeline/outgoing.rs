//! Built-in stages of the outgoing and fault pipelines.

use std::sync::{Arc, Mutex, PoisonError};

use courier_types::error::ConfigurationError;
use courier_types::headers;
use courier_types::message::OutgoingMessage;
use courier_types::routing::RoutingStrategy;
use courier_types::transport::{
    DispatchConsistency, TransportCapabilities, TransportOperation, TransportOperations,
};
use tracing::{debug, trace};

use super::contexts::{FaultContext, OutgoingLogicalContext, OutgoingPhysicalContext, RoutingContext};
use super::error::{ProcessingError, ProcessingOutcome, StageResult};
use super::stage::{Behavior, Connector, Next, NextStage, Terminator};
use crate::routing::RoutingResolver;
use crate::serialization::MessageSerializer;
use crate::transport::BoxDispatcher;

/// Step id of [`ResolveRoutingBehavior`].
pub const RESOLVE_ROUTING_STEP: &str = "ResolveRouting";

/// Operations produced while a received message is being handled, held
/// back until the whole logical segment succeeds.
#[derive(Clone, Default)]
pub struct PendingTransportOperations {
    operations: Arc<Mutex<Vec<TransportOperation>>>,
}

impl PendingTransportOperations {
    pub fn extend(&self, operations: impl IntoIterator<Item = TransportOperation>) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(operations);
    }

    pub fn take(&self) -> Vec<TransportOperation> {
        std::mem::take(
            &mut *self
                .operations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn len(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fills in routing strategies that no earlier stage set explicitly.
pub struct ResolveRoutingBehavior {
    resolver: Arc<RoutingResolver>,
}

impl ResolveRoutingBehavior {
    pub fn new(resolver: Arc<RoutingResolver>) -> Self {
        Self { resolver }
    }
}

impl Behavior for ResolveRoutingBehavior {
    type Context = OutgoingLogicalContext;

    async fn invoke(
        &self,
        context: &mut OutgoingLogicalContext,
        next: Next<OutgoingLogicalContext>,
    ) -> StageResult {
        if context.routing_strategies.is_empty() {
            context.routing_strategies = self.resolver.resolve(context)?;
        }
        next.run(context).await
    }
}

/// Serializes the logical body and hands the message to the physical segment.
pub struct SerializeConnector {
    serializer: Arc<dyn MessageSerializer>,
}

impl SerializeConnector {
    pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
        Self { serializer }
    }
}

impl Connector for SerializeConnector {
    type Upstream = OutgoingLogicalContext;
    type Downstream = OutgoingPhysicalContext;

    async fn connect(
        &self,
        context: &mut OutgoingLogicalContext,
        next: NextStage<OutgoingPhysicalContext>,
    ) -> StageResult {
        let body = self
            .serializer
            .serialize(&context.message.body)
            .map_err(|e| ProcessingError::Serialization(e.to_string()))?;

        let mut headers = context.headers.clone();
        headers.insert(
            headers::CONTENT_TYPE.to_string(),
            self.serializer.content_type().to_string(),
        );
        headers.insert(
            headers::ENCLOSED_MESSAGE_TYPES.to_string(),
            context.message.message_type.clone(),
        );

        let mut physical = OutgoingPhysicalContext {
            message_id: context.message_id.clone(),
            headers,
            body,
            routing_strategies: context.routing_strategies.clone(),
            delivery_constraints: context.delivery_constraints.clone(),
            extensions: context.extensions.child(),
        };
        next.run(&mut physical).await
    }
}

/// Builds the transport message from the physical context.
pub struct PhysicalToRoutingConnector;

impl Connector for PhysicalToRoutingConnector {
    type Upstream = OutgoingPhysicalContext;
    type Downstream = RoutingContext;

    async fn connect(
        &self,
        context: &mut OutgoingPhysicalContext,
        next: NextStage<RoutingContext>,
    ) -> StageResult {
        let mut headers = context.headers.clone();
        headers.insert(headers::MESSAGE_ID.to_string(), context.message_id.clone());
        let message = OutgoingMessage::new(
            context.message_id.clone(),
            headers,
            std::mem::take(&mut context.body),
        );

        let mut routing = RoutingContext::new(
            message,
            context.routing_strategies.clone(),
            &context.extensions,
        );
        routing.delivery_constraints = context.delivery_constraints.clone();
        next.run(&mut routing).await
    }
}

/// Routes a failed message to the error queue, outside any receive batch.
pub struct FaultToRoutingConnector;

impl Connector for FaultToRoutingConnector {
    type Upstream = FaultContext;
    type Downstream = RoutingContext;

    async fn connect(&self, context: &mut FaultContext, next: NextStage<RoutingContext>) -> StageResult {
        let mut routing = RoutingContext::new(
            context.message.clone(),
            vec![RoutingStrategy::unicast(context.error_queue.clone())],
            &context.extensions,
        );
        routing.consistency = DispatchConsistency::Isolated;
        next.run(&mut routing).await
    }
}

/// Hands routed messages to the transport dispatcher.
///
/// Operations with default consistency produced while handling a received
/// message join that message's batch. Everything else is dispatched
/// immediately.
pub struct DispatchTerminator {
    dispatcher: BoxDispatcher,
    capabilities: Arc<TransportCapabilities>,
}

impl DispatchTerminator {
    pub fn new(dispatcher: BoxDispatcher, capabilities: Arc<TransportCapabilities>) -> Self {
        Self {
            dispatcher,
            capabilities,
        }
    }
}

impl Terminator for DispatchTerminator {
    type Context = RoutingContext;

    async fn terminate(&self, context: &mut RoutingContext) -> StageResult {
        if let Some(unsupported) = context
            .delivery_constraints
            .iter()
            .find(|c| !self.capabilities.supports(c.kind()))
        {
            return Err(ConfigurationError::UnsupportedDeliveryConstraint(unsupported.kind()).into());
        }
        if context.routing_strategies.is_empty() {
            debug!(
                message_id = %context.message.message_id,
                "no destinations resolved, nothing to dispatch"
            );
            return Ok(ProcessingOutcome::Completed);
        }

        let operations: Vec<TransportOperation> = context
            .routing_strategies
            .iter()
            .map(|strategy| {
                TransportOperation::new(context.message.clone(), strategy.clone())
                    .with_constraints(context.delivery_constraints.clone())
                    .with_consistency(context.consistency)
            })
            .collect();

        if context.consistency == DispatchConsistency::Default {
            if let Some(pending) = context.extensions.get::<PendingTransportOperations>() {
                trace!(
                    message_id = %context.message.message_id,
                    operations = operations.len(),
                    "deferring dispatch until the receive completes"
                );
                pending.extend(operations);
                return Ok(ProcessingOutcome::Completed);
            }
        }

        self.dispatcher
            .dispatch(TransportOperations::new(operations), &context.extensions)
            .await?;
        Ok(ProcessingOutcome::Completed)
    }
}

impl std::fmt::Debug for PendingTransportOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransportOperations")
            .field("operations", &self.len())
            .finish()
    }
}
