//! Forwarding of failed messages to the error queue.

use std::sync::Arc;

use chrono::Utc;
use courier_types::event::RecoverabilityEvent;
use courier_types::headers;
use courier_types::message::{Headers, OutgoingMessage};
use courier_types::wire::to_wire_format;
use tracing::{error, warn};

use super::critical::CriticalError;
use super::first_level::FailureCounter;
use super::notifications::BusNotifications;
use crate::pipeline::{
    Behavior, FaultContext, MessageContext, Next, PipelineCache, ProcessingError, ProcessingOutcome,
    StageResult, TransportReceiveContext,
};

/// Step id of [`MoveFaultsToErrorQueueBehavior`].
pub const MOVE_FAULTS_STEP: &str = "MoveFaultsToErrorQueue";

/// Consecutive forwarding failures tolerated before a critical error.
pub const FORWARDING_FAILURE_LIMIT: u32 = 4;

/// Write the failure description onto a message's headers.
pub fn set_exception_headers(target: &mut Headers, error: &ProcessingError, failed_queue: &str) {
    target.insert(headers::EXCEPTION_TYPE.to_string(), error.exception_type());
    target.insert(headers::EXCEPTION_MESSAGE.to_string(), error.to_string());
    target.insert(headers::EXCEPTION_SOURCE.to_string(), error.kind().to_string());
    target.insert(headers::EXCEPTION_STACK_TRACE.to_string(), error.stack_trace());
    match error.inner_cause() {
        Some(inner) => {
            target.insert(headers::INNER_EXCEPTION_TYPE.to_string(), inner);
        }
        None => {
            target.remove(headers::INNER_EXCEPTION_TYPE);
        }
    }
    target.insert(headers::FAILED_QUEUE.to_string(), failed_queue.to_string());
    target.insert(headers::TIME_OF_FAILURE.to_string(), to_wire_format(Utc::now()));
}

/// Outermost stage of the receive pipeline.
///
/// A failure that reaches this stage is forwarded, with exception headers,
/// to the error queue through the fault pipeline, and the receive is
/// reported as `MovedToErrorQueue` so the transport consumes it. If
/// forwarding itself fails, the original error propagates and the
/// transport will hand the message back; once forwarding of the same
/// message has failed more than [`FORWARDING_FAILURE_LIMIT`] times a
/// critical error is raised, exactly once.
pub struct MoveFaultsToErrorQueueBehavior {
    pipelines: Arc<PipelineCache>,
    pipeline: String,
    error_queue: String,
    local_address: String,
    critical_error: CriticalError,
    notifications: BusNotifications,
    forwarding_failures: Arc<FailureCounter>,
}

impl MoveFaultsToErrorQueueBehavior {
    /// The fault pipeline is looked up in `pipelines` under `pipeline` when
    /// a message fails, so it may be built after this behavior is registered.
    pub fn new(
        pipelines: Arc<PipelineCache>,
        pipeline: impl Into<String>,
        error_queue: impl Into<String>,
        local_address: impl Into<String>,
        critical_error: CriticalError,
        notifications: BusNotifications,
        forwarding_failures: Arc<FailureCounter>,
    ) -> Self {
        Self {
            pipelines,
            pipeline: pipeline.into(),
            error_queue: error_queue.into(),
            local_address: local_address.into(),
            critical_error,
            notifications,
            forwarding_failures,
        }
    }

    async fn forward(
        &self,
        context: &mut TransportReceiveContext,
        error: &ProcessingError,
    ) -> Result<OutgoingMessage, ProcessingError> {
        let fault_pipeline = self
            .pipelines
            .get::<FaultContext>(&self.pipeline)
            .ok_or_else(|| ProcessingError::InvalidMessage {
                message_id: context.message_id().to_string(),
                reason: format!("no fault pipeline is registered for '{}'", self.pipeline),
            })?;

        let message = context.message_mut();
        set_exception_headers(&mut message.headers, error, &self.local_address);
        let outgoing = OutgoingMessage::from_incoming(message);

        let mut fault = FaultContext::new(outgoing.clone(), &self.error_queue, &context.extensions);
        fault_pipeline.invoke(&mut fault).await?;
        Ok(outgoing)
    }
}

impl Behavior for MoveFaultsToErrorQueueBehavior {
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

        match self.forward(context, &error).await {
            Ok(forwarded) => {
                self.forwarding_failures.clear(&self.pipeline, &message_id);
                warn!(
                    %message_id,
                    error_queue = %self.error_queue,
                    error = %error,
                    "Moving message '{message_id}' to the error queue because processing failed"
                );
                self.notifications
                    .publish(RecoverabilityEvent::MessageSentToErrorQueue {
                        message_id,
                        error_queue: self.error_queue.clone(),
                        headers: forwarded.headers,
                        body: forwarded.body,
                        failure: error.failure_info(),
                        at: Utc::now(),
                    });
                Ok(ProcessingOutcome::MovedToErrorQueue { error })
            }
            Err(forward_error) => {
                let failures = self
                    .forwarding_failures
                    .increment(&self.pipeline, &message_id);
                error!(
                    %message_id,
                    failures,
                    error = %forward_error,
                    "Failed to forward message '{message_id}' to the error queue"
                );
                if failures == FORWARDING_FAILURE_LIMIT + 1 {
                    self.critical_error
                        .raise("Failed to forward message to error queue", &forward_error);
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use courier_types::message::IncomingMessage;

    use super::*;
    use crate::context::ContextBag;
    use crate::pipeline::{Pipeline, PipelineModifications, StepRegistration, Terminator};

    const MAIN: &str = "Main";

    struct Failing;

    impl Terminator for Failing {
        type Context = TransportReceiveContext;
        async fn terminate(&self, _context: &mut TransportReceiveContext) -> StageResult {
            Err(ProcessingError::handler("Simulated exception"))
        }
    }

    /// Records forwarded messages, or fails every forward.
    struct FakeErrorQueue {
        received: Arc<Mutex<Vec<(String, OutgoingMessage)>>>,
        fail: bool,
    }

    impl Terminator for FakeErrorQueue {
        type Context = FaultContext;
        async fn terminate(&self, context: &mut FaultContext) -> StageResult {
            if self.fail {
                return Err(courier_types::error::TransportError::Dispatch("queue down".into()).into());
            }
            self.received
                .lock()
                .unwrap()
                .push((context.error_queue.clone(), context.message.clone()));
            Ok(ProcessingOutcome::Completed)
        }
    }

    struct Harness {
        pipeline: Pipeline<TransportReceiveContext>,
        received: Arc<Mutex<Vec<(String, OutgoingMessage)>>>,
        critical: Arc<Mutex<Vec<String>>>,
        notifications: BusNotifications,
    }

    fn harness(fail_forwarding: bool) -> Harness {
        let cache = Arc::new(PipelineCache::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        cache.insert(Arc::new(Pipeline::terminated(
            MAIN,
            FakeErrorQueue {
                received: Arc::clone(&received),
                fail: fail_forwarding,
            },
        )));

        let critical = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&critical);
        let critical_error = CriticalError::new(move |message, _| {
            sink.lock().unwrap().push(message.to_string());
        });
        let notifications = BusNotifications::default();

        let mut mods = PipelineModifications::new(MAIN);
        mods.register(StepRegistration::new(
            MOVE_FAULTS_STEP,
            MoveFaultsToErrorQueueBehavior::new(
                cache,
                MAIN,
                "error",
                "sales",
                critical_error,
                notifications.clone(),
                Arc::new(FailureCounter::new()),
            ),
            "moves failed messages to the error queue",
        ))
        .unwrap();

        Harness {
            pipeline: mods.build(Failing).unwrap(),
            received,
            critical,
            notifications,
        }
    }

    fn receive(id: &str) -> TransportReceiveContext {
        let mut headers = Headers::new();
        headers.insert("Custom".into(), "kept".into());
        TransportReceiveContext::new(
            IncomingMessage::new(id, headers, b"{\"x\":1}".to_vec()),
            &ContextBag::new(),
        )
    }

    #[tokio::test]
    async fn failed_message_is_forwarded_with_exception_headers() {
        let harness = harness(false);
        let mut events = harness.notifications.subscribe();

        let outcome = harness.pipeline.invoke(&mut receive("m-1")).await.unwrap();
        match outcome {
            ProcessingOutcome::MovedToErrorQueue { error } => {
                assert_eq!(error.to_string(), "Simulated exception");
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let received = harness.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (queue, message) = &received[0];
        assert_eq!(queue, "error");
        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.body, b"{\"x\":1}");
        assert_eq!(message.header(headers::FAILED_QUEUE), Some("sales"));
        assert_eq!(message.header(headers::EXCEPTION_MESSAGE), Some("Simulated exception"));
        assert_eq!(
            message.header(headers::EXCEPTION_TYPE),
            Some("courier::ProcessingError::Handler")
        );
        assert!(message.header(headers::TIME_OF_FAILURE).is_some());
        assert_eq!(message.header("Custom"), Some("kept"));

        match events.recv().await.unwrap() {
            RecoverabilityEvent::MessageSentToErrorQueue {
                message_id,
                error_queue,
                ..
            } => {
                assert_eq!(message_id, "m-1");
                assert_eq!(error_queue, "error");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwarding_failure_propagates_original_error() {
        let harness = harness(true);
        let err = harness.pipeline.invoke(&mut receive("m-1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Simulated exception");
        assert!(harness.critical.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn critical_error_raised_once_after_repeated_forwarding_failures() {
        let harness = harness(true);

        for _ in 0..FORWARDING_FAILURE_LIMIT {
            assert!(harness.pipeline.invoke(&mut receive("m-1")).await.is_err());
        }
        assert!(harness.critical.lock().unwrap().is_empty());

        for _ in 0..3 {
            let err = harness.pipeline.invoke(&mut receive("m-1")).await.unwrap_err();
            assert_eq!(err.to_string(), "Simulated exception");
        }
        assert_eq!(
            *harness.critical.lock().unwrap(),
            vec!["Failed to forward message to error queue"]
        );
    }

    #[tokio::test]
    async fn successful_message_passes_through() {
        struct Ok_;
        impl Terminator for Ok_ {
            type Context = TransportReceiveContext;
            async fn terminate(&self, _context: &mut TransportReceiveContext) -> StageResult {
                Ok(ProcessingOutcome::Completed)
            }
        }

        let cache = Arc::new(PipelineCache::new());
        let mut mods = PipelineModifications::new(MAIN);
        mods.register(StepRegistration::new(
            MOVE_FAULTS_STEP,
            MoveFaultsToErrorQueueBehavior::new(
                cache,
                MAIN,
                "error",
                "sales",
                CriticalError::default(),
                BusNotifications::default(),
                Arc::new(FailureCounter::new()),
            ),
            "moves failed messages to the error queue",
        ))
        .unwrap();
        let pipeline = mods.build(Ok_).unwrap();
        assert!(pipeline.invoke(&mut receive("m-1")).await.unwrap().is_completed());
    }
}
