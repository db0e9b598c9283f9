use std::sync::Arc;

use courier_types::message::OutgoingMessage;
use courier_types::routing::RoutingStrategy;
use courier_types::transport::{TransportOperation, TransportOperations};
use tracing::error;

use crate::pipeline::{
    Behavior, MessageContext, Next, ProcessingError, ProcessingOutcome, StageResult, TransportReceiveContext,
};
use crate::recoverability::{CriticalError, FailureCounter, set_exception_headers};
use crate::transport::BoxDispatcher;

/// Step id of [`TimeoutRecoverabilityBehavior`].
pub const TIMEOUT_RECOVERABILITY_STEP: &str = "TimeoutRecoverability";

/// Attempts a satellite message gets before it is forwarded to the error queue.
pub const MAX_TIMEOUT_RETRIES: u32 = 4;

/// Outermost stage of both timeout satellites.
///
/// Failed receives are handed back until a message has failed more than
/// [`MAX_TIMEOUT_RETRIES`] times; it is then forwarded to the error queue
/// directly through the dispatcher. A failed forward is a critical error.
pub struct TimeoutRecoverabilityBehavior {
    failures: Arc<FailureCounter>,
    pipeline: String,
    error_queue: String,
    local_address: String,
    dispatcher: BoxDispatcher,
    critical_error: CriticalError,
}

impl TimeoutRecoverabilityBehavior {
    pub fn new(
        failures: Arc<FailureCounter>,
        pipeline: impl Into<String>,
        error_queue: impl Into<String>,
        local_address: impl Into<String>,
        dispatcher: BoxDispatcher,
        critical_error: CriticalError,
    ) -> Self {
        Self {
            failures,
            pipeline: pipeline.into(),
            error_queue: error_queue.into(),
            local_address: local_address.into(),
            dispatcher,
            critical_error,
        }
    }
}

impl Behavior for TimeoutRecoverabilityBehavior {
    type Context = TransportReceiveContext;

    async fn invoke(
        &self,
        context: &mut TransportReceiveContext,
        next: Next<TransportReceiveContext>,
    ) -> StageResult {
        let error = match next.run(context).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => error,
        };
        let message_id = context.message_id().to_string();

        if self.failures.increment(&self.pipeline, &message_id) <= MAX_TIMEOUT_RETRIES {
            return Ok(ProcessingOutcome::RetryRequested);
        }

        error!(
            %message_id,
            satellite = %self.pipeline,
            error = %error,
            "Moving timeout message '{message_id}' to the error queue because processing failed"
        );
        let message = context.message_mut();
        set_exception_headers(&mut message.headers, &error, &self.local_address);
        let outgoing = OutgoingMessage::from_incoming(message);
        let operation = TransportOperation::new(outgoing, RoutingStrategy::unicast(&self.error_queue));

        match self
            .dispatcher
            .dispatch(TransportOperations::new([operation]), &context.extensions)
            .await
        {
            Ok(()) => {
                self.failures.clear(&self.pipeline, &message_id);
                Ok(ProcessingOutcome::MovedToErrorQueue { error })
            }
            Err(forward_error) => {
                self.critical_error
                    .raise("Failed to forward failed timeout message to error queue", &forward_error);
                Err(ProcessingError::Transport(forward_error))
            }
        }
    }
}
