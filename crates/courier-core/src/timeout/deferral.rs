use chrono::Utc;
use courier_types::headers;
use courier_types::routing::RoutingStrategy;
use courier_types::wire::to_wire_format;
use tracing::debug;

use crate::pipeline::{Behavior, Next, RoutingContext, StageResult};
use crate::routing::RoutingError;

/// Step id of [`RouteDeferredMessageToTimeoutManagerBehavior`].
pub const ROUTE_DEFERRED_STEP: &str = "RouteDeferredMessageToTimeoutManager";

/// Emulates delayed delivery by sending deferred messages to the timeout
/// storage satellite instead of their destination.
///
/// The original destination and due time travel in headers; the delay
/// constraint itself is dropped so the transport never sees it.
pub struct RouteDeferredMessageToTimeoutManagerBehavior {
    timeout_manager_address: String,
}

impl RouteDeferredMessageToTimeoutManagerBehavior {
    pub fn new(timeout_manager_address: impl Into<String>) -> Self {
        Self {
            timeout_manager_address: timeout_manager_address.into(),
        }
    }
}

impl Behavior for RouteDeferredMessageToTimeoutManagerBehavior {
    type Context = RoutingContext;

    async fn invoke(&self, context: &mut RoutingContext, next: Next<RoutingContext>) -> StageResult {
        let now = Utc::now();
        let Some(deliver_at) = context
            .delivery_constraints
            .iter()
            .find_map(|constraint| constraint.deliver_at(now))
        else {
            return next.run(context).await;
        };

        let destination = match context.routing_strategies.as_slice() {
            [RoutingStrategy::Unicast { destination }] => destination.clone(),
            _ => {
                return Err(RoutingError::DelayedDeliveryRequiresUnicast(
                    context.message.message_id.clone(),
                )
                .into());
            }
        };

        debug!(
            message_id = %context.message.message_id,
            %destination,
            deliver_at = %deliver_at,
            "deferring message through the timeout manager"
        );
        let message_headers = &mut context.message.headers;
        message_headers.insert(headers::TIMEOUT_ROUTE_EXPIRED_TO.to_string(), destination);
        message_headers.insert(headers::TIMEOUT_EXPIRE.to_string(), to_wire_format(deliver_at));
        message_headers.insert(headers::IS_DEFERRED_MESSAGE.to_string(), "true".to_string());

        context.routing_strategies = vec![RoutingStrategy::unicast(&self.timeout_manager_address)];
        context
            .delivery_constraints
            .retain(|constraint| !constraint.is_delayed_delivery());
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use courier_types::delivery::DeliveryConstraint;
    use courier_types::message::OutgoingMessage;
    use courier_types::wire::from_wire_format;

    use super::*;
    use crate::context::ContextBag;
    use crate::pipeline::{
        Pipeline, PipelineModifications, ProcessingError, ProcessingOutcome, StepRegistration, Terminator,
    };

    type Captured = Arc<Mutex<Option<(Vec<RoutingStrategy>, Vec<DeliveryConstraint>, OutgoingMessage)>>>;

    struct Capture(Captured);

    impl Terminator for Capture {
        type Context = RoutingContext;
        async fn terminate(&self, context: &mut RoutingContext) -> StageResult {
            *self.0.lock().unwrap() = Some((
                context.routing_strategies.clone(),
                context.delivery_constraints.clone(),
                context.message.clone(),
            ));
            Ok(ProcessingOutcome::Completed)
        }
    }

    fn pipeline(captured: &Captured) -> Pipeline<RoutingContext> {
        let mut mods = PipelineModifications::new("Routing");
        mods.register(StepRegistration::new(
            ROUTE_DEFERRED_STEP,
            RouteDeferredMessageToTimeoutManagerBehavior::new("sales.Timeouts"),
            "reroutes deferred messages to the timeout manager",
        ))
        .unwrap();
        mods.build(Capture(Arc::clone(captured))).unwrap()
    }

    fn routing(strategies: Vec<RoutingStrategy>, constraints: Vec<DeliveryConstraint>) -> RoutingContext {
        let mut context = RoutingContext::new(
            OutgoingMessage::new("m-1", Default::default(), b"{}".to_vec()),
            strategies,
            &ContextBag::new(),
        );
        context.delivery_constraints = constraints;
        context
    }

    #[tokio::test]
    async fn delayed_message_is_rerouted_to_the_timeout_manager() {
        let captured = Captured::default();
        let pipeline = pipeline(&captured);
        let before = Utc::now();

        let mut context = routing(
            vec![RoutingStrategy::unicast("billing")],
            vec![
                DeliveryConstraint::DelayDeliveryWith {
                    delay: Duration::from_secs(60),
                },
                DeliveryConstraint::DiscardIfNotReceivedBefore {
                    time_to_be_received: Duration::from_secs(600),
                },
            ],
        );
        pipeline.invoke(&mut context).await.unwrap();

        let (strategies, constraints, message) = captured.lock().unwrap().take().unwrap();
        assert_eq!(strategies, vec![RoutingStrategy::unicast("sales.Timeouts")]);
        assert_eq!(constraints.len(), 1);
        assert!(!constraints[0].is_delayed_delivery());
        assert_eq!(message.header(headers::TIMEOUT_ROUTE_EXPIRED_TO), Some("billing"));
        assert_eq!(message.header(headers::IS_DEFERRED_MESSAGE), Some("true"));

        let expire = from_wire_format(message.header(headers::TIMEOUT_EXPIRE).unwrap()).unwrap();
        assert!(expire >= before + chrono::Duration::seconds(59));
        assert!(expire <= Utc::now() + chrono::Duration::seconds(61));
    }

    #[tokio::test]
    async fn undelayed_message_passes_untouched() {
        let captured = Captured::default();
        let pipeline = pipeline(&captured);

        pipeline
            .invoke(&mut routing(vec![RoutingStrategy::unicast("billing")], Vec::new()))
            .await
            .unwrap();

        let (strategies, _, message) = captured.lock().unwrap().take().unwrap();
        assert_eq!(strategies, vec![RoutingStrategy::unicast("billing")]);
        assert!(message.header(headers::TIMEOUT_EXPIRE).is_none());
    }

    #[tokio::test]
    async fn delayed_multicast_is_rejected() {
        let captured = Captured::default();
        let pipeline = pipeline(&captured);

        let err = pipeline
            .invoke(&mut routing(
                vec![RoutingStrategy::multicast("sales.OrderPlaced")],
                vec![DeliveryConstraint::DoNotDeliverBefore {
                    at: Utc::now() + chrono::Duration::hours(1),
                }],
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Routing(RoutingError::DelayedDeliveryRequiresUnicast(_))
        ));
        assert!(captured.lock().unwrap().is_none());
    }
}
