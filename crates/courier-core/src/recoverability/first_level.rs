//! First-level retries.
//!
//! A failed receive is handed straight back to the transport for another
//! attempt until the retry budget is used up. Failures are counted per
//! (pipeline, message id) so that pipelines sharing one counter never see
//! each other's attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use courier_types::event::RecoverabilityEvent;
use courier_types::headers;
use dashmap::DashMap;
use tracing::{debug, info};

use super::cleaner::ClearFailures;
use super::notifications::BusNotifications;
use crate::pipeline::{Behavior, MessageContext, Next, ProcessingOutcome, StageResult, TransportReceiveContext};

/// Step id of [`FirstLevelRetriesBehavior`].
pub const FIRST_LEVEL_RETRIES_STEP: &str = "FirstLevelRetries";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FailureKey {
    pipeline: String,
    message_id: String,
}

impl FailureKey {
    fn new(pipeline: &str, message_id: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

/// Concurrent failure counts keyed by (pipeline, message id).
///
/// Increments are atomic: two racing failures of the same message always
/// produce two distinct counts.
#[derive(Debug, Default)]
pub struct FailureCounter {
    counts: DashMap<FailureKey, AtomicU32>,
}

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more failure and return the new count.
    pub fn increment(&self, pipeline: &str, message_id: &str) -> u32 {
        let key = FailureKey::new(pipeline, message_id);
        if let Some(count) = self.counts.get(&key) {
            return count.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let entry = self.counts.entry(key).or_insert_with(|| AtomicU32::new(0));
        entry.value().fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current count; zero if the message has no entry.
    pub fn get(&self, pipeline: &str, message_id: &str) -> u32 {
        self.counts
            .get(&FailureKey::new(pipeline, message_id))
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn clear(&self, pipeline: &str, message_id: &str) {
        self.counts.remove(&FailureKey::new(pipeline, message_id));
    }

    pub fn clear_all(&self) {
        self.counts.clear();
    }

    /// Number of messages with a recorded failure.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl ClearFailures for FailureCounter {
    fn clear_failures(&self) {
        self.clear_all();
    }
}

/// How many immediate retries a message gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether a message that has failed `failures` times may be retried.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }
}

/// Requests immediate retries for failed receives, then gives up by
/// propagating the error to the fault stage.
///
/// Deserialization failures are never retried.
pub struct FirstLevelRetriesBehavior {
    counter: Arc<FailureCounter>,
    policy: RetryPolicy,
    pipeline: String,
    notifications: BusNotifications,
}

impl FirstLevelRetriesBehavior {
    pub fn new(
        counter: Arc<FailureCounter>,
        policy: RetryPolicy,
        pipeline: impl Into<String>,
        notifications: BusNotifications,
    ) -> Self {
        Self {
            counter,
            policy,
            pipeline: pipeline.into(),
            notifications,
        }
    }
}

impl Behavior for FirstLevelRetriesBehavior {
    type Context = TransportReceiveContext;

    async fn invoke(
        &self,
        context: &mut TransportReceiveContext,
        next: Next<TransportReceiveContext>,
    ) -> StageResult {
        let message_id = context.message_id().to_string();
        let error = match next.run(context).await {
            Ok(outcome) => {
                self.counter.clear(&self.pipeline, &message_id);
                return Ok(outcome);
            }
            Err(error) if error.is_deserialization() => {
                debug!(%message_id, "deserialization failure, skipping first-level retries");
                return Err(error);
            }
            Err(error) => error,
        };

        let failures = self.counter.increment(&self.pipeline, &message_id);
        if self.policy.should_retry(failures) {
            let retry_attempt = failures - 1;
            info!(
                %message_id,
                pipeline = %self.pipeline,
                retry_attempt,
                error = %error,
                "First level retry is going to retry message '{message_id}' because of an exception"
            );
            self.notifications
                .publish(RecoverabilityEvent::FirstLevelRetryAttempted {
                    message_id,
                    retry_attempt,
                    failure: error.failure_info(),
                });
            return Ok(ProcessingOutcome::RetryRequested);
        }

        self.counter.clear(&self.pipeline, &message_id);
        context.message_mut().headers.insert(
            headers::FIRST_LEVEL_RETRIES.to_string(),
            (failures - 1).to_string(),
        );
        info!(
            %message_id,
            pipeline = %self.pipeline,
            "Giving up First Level Retries for message '{message_id}'"
        );
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use courier_types::message::IncomingMessage;

    use super::*;
    use crate::context::ContextBag;
    use crate::pipeline::{
        Pipeline, PipelineModifications, ProcessingError, StepRegistration, Terminator,
    };

    struct Failing;

    impl Terminator for Failing {
        type Context = TransportReceiveContext;
        async fn terminate(&self, _context: &mut TransportReceiveContext) -> StageResult {
            Err(ProcessingError::handler("Simulated exception"))
        }
    }

    struct BadBody;

    impl Terminator for BadBody {
        type Context = TransportReceiveContext;
        async fn terminate(&self, context: &mut TransportReceiveContext) -> StageResult {
            Err(ProcessingError::Deserialization {
                message_id: context.message_id().to_string(),
                reason: "not json".into(),
            })
        }
    }

    struct Succeeding;

    impl Terminator for Succeeding {
        type Context = TransportReceiveContext;
        async fn terminate(&self, _context: &mut TransportReceiveContext) -> StageResult {
            Ok(ProcessingOutcome::Completed)
        }
    }

    fn pipeline<T>(
        counter: &Arc<FailureCounter>,
        max_retries: u32,
        name: &str,
        terminator: T,
    ) -> Pipeline<TransportReceiveContext>
    where
        T: Terminator<Context = TransportReceiveContext> + 'static,
    {
        let mut mods = PipelineModifications::new(name);
        mods.register(StepRegistration::new(
            FIRST_LEVEL_RETRIES_STEP,
            FirstLevelRetriesBehavior::new(
                Arc::clone(counter),
                RetryPolicy::new(max_retries),
                name,
                BusNotifications::default(),
            ),
            "first-level retries",
        ))
        .unwrap();
        mods.build(terminator).unwrap()
    }

    fn receive(id: &str) -> TransportReceiveContext {
        TransportReceiveContext::new(
            IncomingMessage::new(id, Default::default(), b"{}".to_vec()),
            &ContextBag::new(),
        )
    }

    #[tokio::test]
    async fn retries_until_budget_is_used_up() {
        let counter = Arc::new(FailureCounter::new());
        let pipeline = pipeline(&counter, 3, "Main", Failing);

        for attempt in 1..=3 {
            let outcome = pipeline.invoke(&mut receive("m-1")).await.unwrap();
            assert!(outcome.is_retry_requested());
            assert_eq!(counter.get("Main", "m-1"), attempt);
        }
    }

    #[tokio::test]
    async fn giving_up_propagates_error_and_records_retries_header() {
        let counter = Arc::new(FailureCounter::new());
        let pipeline = pipeline(&counter, 2, "Main", Failing);

        pipeline.invoke(&mut receive("m-1")).await.unwrap();
        pipeline.invoke(&mut receive("m-1")).await.unwrap();

        let mut context = receive("m-1");
        let err = pipeline.invoke(&mut context).await.unwrap_err();
        assert_eq!(err.to_string(), "Simulated exception");
        assert_eq!(
            context.message().header(headers::FIRST_LEVEL_RETRIES),
            Some("2")
        );
        assert_eq!(counter.get("Main", "m-1"), 0);
        assert!(counter.is_empty());
    }

    #[tokio::test]
    async fn counter_restarts_after_giving_up() {
        let counter = Arc::new(FailureCounter::new());
        let pipeline = pipeline(&counter, 1, "Main", Failing);

        assert!(pipeline.invoke(&mut receive("m-1")).await.unwrap().is_retry_requested());
        assert!(pipeline.invoke(&mut receive("m-1")).await.is_err());

        assert!(pipeline.invoke(&mut receive("m-1")).await.unwrap().is_retry_requested());
        assert_eq!(counter.get("Main", "m-1"), 1);
    }

    #[tokio::test]
    async fn deserialization_failures_are_not_retried() {
        let counter = Arc::new(FailureCounter::new());
        let pipeline = pipeline(&counter, 5, "Main", BadBody);

        let err = pipeline.invoke(&mut receive("m-1")).await.unwrap_err();
        assert!(err.is_deserialization());
        assert_eq!(counter.get("Main", "m-1"), 0);
    }

    #[tokio::test]
    async fn pipelines_sharing_a_counter_are_tracked_independently() {
        let counter = Arc::new(FailureCounter::new());
        let first = pipeline(&counter, 5, "1", Failing);
        let second = pipeline(&counter, 5, "2", Failing);

        first.invoke(&mut receive("m-1")).await.unwrap();
        first.invoke(&mut receive("m-1")).await.unwrap();
        second.invoke(&mut receive("m-1")).await.unwrap();

        assert_eq!(counter.get("1", "m-1"), 2);
        assert_eq!(counter.get("2", "m-1"), 1);
    }

    #[tokio::test]
    async fn pipeline_with_smaller_budget_gives_up_first() {
        let counter = Arc::new(FailureCounter::new());
        let first = pipeline(&counter, 1, "1", Failing);
        let second = pipeline(&counter, 2, "2", Failing);

        assert!(first.invoke(&mut receive("m-1")).await.unwrap().is_retry_requested());
        assert!(second.invoke(&mut receive("m-1")).await.unwrap().is_retry_requested());

        assert!(first.invoke(&mut receive("m-1")).await.is_err());
        assert!(second.invoke(&mut receive("m-1")).await.unwrap().is_retry_requested());
        assert_eq!(counter.get("1", "m-1"), 0);
        assert_eq!(counter.get("2", "m-1"), 2);
    }

    #[tokio::test]
    async fn success_clears_previous_failures() {
        let counter = Arc::new(FailureCounter::new());
        counter.increment("Main", "m-1");
        let pipeline = pipeline(&counter, 5, "Main", Succeeding);

        let outcome = pipeline.invoke(&mut receive("m-1")).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(counter.get("Main", "m-1"), 0);
    }

    #[tokio::test]
    async fn retry_attempt_notification_is_zero_based() {
        let counter = Arc::new(FailureCounter::new());
        let notifications = BusNotifications::default();
        let mut events = notifications.subscribe();

        let mut mods = PipelineModifications::new("Main");
        mods.register(StepRegistration::new(
            FIRST_LEVEL_RETRIES_STEP,
            FirstLevelRetriesBehavior::new(
                Arc::clone(&counter),
                RetryPolicy::new(5),
                "Main",
                notifications.clone(),
            ),
            "first-level retries",
        ))
        .unwrap();
        let pipeline = mods.build(Failing).unwrap();

        pipeline.invoke(&mut receive("m-1")).await.unwrap();
        match events.recv().await.unwrap() {
            RecoverabilityEvent::FirstLevelRetryAttempted {
                message_id,
                retry_attempt,
                failure,
            } => {
                assert_eq!(message_id, "m-1");
                assert_eq!(retry_attempt, 0);
                assert_eq!(failure.message, "Simulated exception");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = Arc::new(FailureCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.increment("Main", "m-1");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get("Main", "m-1"), 800);
    }
}
