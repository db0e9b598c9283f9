//! Message pump over an in-memory queue.
//!
//! One receive loop per pump waits for a concurrency permit, then for a
//! message, and hands each message to its own task. A task commits by
//! dropping the message and rolls back by putting it back at the head of
//! the queue. Panics are contained to the task that raised them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_core::context::ContextBag;
use courier_core::pipeline::ProcessingOutcome;
use courier_core::recoverability::CriticalError;
use courier_core::transport::{PipelineEntry, PushContext, PushMessages};
use courier_observe::messaging_attrs::{OP_PROCESS, SYSTEM_IN_MEMORY};
use courier_types::error::TransportError;
use courier_types::transport::{PushRuntimeSettings, PushSettings};
use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::broker::{InMemoryBroker, InMemoryQueue, QueuedMessage};

/// What `init` hands the pump.
struct Receiver {
    queue: Arc<InMemoryQueue>,
    entry: PipelineEntry,
    critical_error: CriticalError,
    settings: PushSettings,
}

struct Running {
    cancel: CancellationToken,
    tracker: TaskTracker,
    receive_loop: JoinHandle<()>,
}

pub struct InMemoryMessagePump {
    broker: InMemoryBroker,
    stop_grace_period: Duration,
    receiver: Option<Arc<Receiver>>,
    running: Option<Running>,
}

impl InMemoryMessagePump {
    pub fn new(broker: InMemoryBroker, stop_grace_period: Duration) -> Self {
        Self {
            broker,
            stop_grace_period,
            receiver: None,
            running: None,
        }
    }
}

impl PushMessages for InMemoryMessagePump {
    async fn init(
        &mut self,
        entry: PipelineEntry,
        critical_error: CriticalError,
        settings: PushSettings,
    ) -> Result<(), TransportError> {
        let queue = self.broker.existing_queue(&settings.input_queue)?;
        if settings.purge_on_startup {
            let purged = queue.purge();
            info!(input_queue = %settings.input_queue, purged, "input queue purged on startup");
        }
        self.receiver = Some(Arc::new(Receiver {
            queue,
            entry,
            critical_error,
            settings,
        }));
        Ok(())
    }

    fn start(&mut self, limitations: PushRuntimeSettings) -> Result<(), TransportError> {
        let receiver = self.receiver.clone().ok_or(TransportError::NotInitialized)?;
        if self.running.is_some() {
            warn!(input_queue = %receiver.settings.input_queue, "message pump already started");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let semaphore = Arc::new(Semaphore::new(limitations.max_concurrency));
        let receive_loop = tokio::spawn(receive_loop(receiver, semaphore, cancel.clone(), tracker.clone()));
        self.running = Some(Running {
            cancel,
            tracker,
            receive_loop,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        let Some(Running {
            cancel,
            tracker,
            receive_loop,
        }) = self.running.take()
        else {
            return Ok(());
        };
        cancel.cancel();
        tracker.close();

        let drained = tokio::time::timeout(self.stop_grace_period, async {
            if let Err(e) = receive_loop.await {
                error!(error = %e, "receive loop terminated abnormally");
            }
            tracker.wait().await;
        })
        .await;

        match drained {
            Ok(()) => {
                debug!("message pump stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    in_flight = tracker.len(),
                    "The message pump failed to stop within the time allowed ({:?})", self.stop_grace_period
                );
                Err(TransportError::StopTimeout(self.stop_grace_period))
            }
        }
    }
}

async fn receive_loop(
    receiver: Arc<Receiver>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let input_queue = receiver.settings.input_queue.clone();
    debug!(input_queue = %input_queue, "receive loop started");

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            queued = receiver.queue.receive() => queued,
        };

        if queued.is_expired(Utc::now()) {
            debug!(
                input_queue = %input_queue,
                message_id = %queued.message.message_id,
                "time to be received has elapsed, message discarded"
            );
            continue;
        }

        let span = info_span!(
            "process",
            messaging.system = SYSTEM_IN_MEMORY,
            messaging.operation.type = OP_PROCESS,
            messaging.destination.name = %input_queue,
            messaging.message.id = %queued.message.message_id,
            messaging.message.body.size = queued.message.body.len(),
        );
        tracker.spawn(process(Arc::clone(&receiver), queued, permit).instrument(span));
    }

    debug!(input_queue = %input_queue, "receive loop stopped");
}

async fn process(receiver: Arc<Receiver>, queued: QueuedMessage, _permit: OwnedSemaphorePermit) {
    let push = PushContext::new(queued.message.clone(), ContextBag::new());
    let result = AssertUnwindSafe((receiver.entry)(push)).catch_unwind().await;

    match result {
        Ok(Ok(ProcessingOutcome::RetryRequested)) => {
            debug!("retry requested, message returned to the queue");
            receiver.queue.requeue(queued);
        }
        Ok(Ok(_)) => debug!("receive committed"),
        Ok(Err(e)) => {
            warn!(error = %e, kind = e.kind(), "processing failed, message returned to the queue");
            receiver.queue.requeue(queued);
        }
        Err(panic) => {
            let cause = TransportError::Receive(format!("pipeline panicked: {}", panic_message(panic.as_ref())));
            receiver
                .critical_error
                .raise("Message pump task panicked while processing a message", &cause);
            receiver.queue.requeue(queued);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_core::pipeline::{BoxFuture, ProcessingError, StageResult};
    use courier_types::message::{Headers, IncomingMessage};
    use courier_types::transport::TransportTransactionMode;

    use super::*;

    fn settings(queue: &str) -> PushSettings {
        PushSettings {
            input_queue: queue.into(),
            error_queue: "error".into(),
            purge_on_startup: false,
            required_transaction_mode: TransportTransactionMode::ReceiveOnly,
        }
    }

    fn enqueue(broker: &InMemoryBroker, queue: &str, id: &str) {
        broker
            .queue(queue)
            .unwrap()
            .push(QueuedMessage::new(IncomingMessage::new(id, Headers::new(), Vec::new())));
    }

    fn entry(f: impl Fn(PushContext) -> BoxFuture<'static, StageResult> + Send + Sync + 'static) -> PipelineEntry {
        Arc::new(f)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_before_init_fails() {
        let mut pump = InMemoryMessagePump::new(InMemoryBroker::new(), Duration::from_secs(1));
        assert_eq!(
            pump.start(PushRuntimeSettings::new(1)).unwrap_err(),
            TransportError::NotInitialized
        );
    }

    #[tokio::test]
    async fn init_requires_an_existing_queue() {
        let mut pump = InMemoryMessagePump::new(InMemoryBroker::new(), Duration::from_secs(1));
        let err = pump
            .init(
                entry(|_| -> BoxFuture<'static, StageResult> { Box::pin(async { Ok(ProcessingOutcome::Completed) }) }),
                CriticalError::default(),
                settings("sales"),
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::QueueNotFound("sales".into()));
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrency() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        for i in 0..20 {
            enqueue(&broker, "sales", &format!("m{i}"));
        }

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (a, p, d) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&done));
        let pipeline = entry(move |_| -> BoxFuture<'static, StageResult> {
            let (active, peak, done) = (Arc::clone(&a), Arc::clone(&p), Arc::clone(&d));
            Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(ProcessingOutcome::Completed)
            })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(5));
        pump.init(pipeline, CriticalError::default(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(3)).unwrap();

        wait_until(|| done.load(Ordering::SeqCst) == 20).await;
        pump.stop().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(broker.depth("sales"), 0);
    }

    #[tokio::test]
    async fn blocked_invocations_hold_the_limit() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        for i in 0..15 {
            enqueue(&broker, "sales", &format!("m{i}"));
        }

        let gate = Arc::new(Semaphore::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (g, a, d) = (Arc::clone(&gate), Arc::clone(&active), Arc::clone(&done));
        let pipeline = entry(move |_| -> BoxFuture<'static, StageResult> {
            let (gate, active, done) = (Arc::clone(&g), Arc::clone(&a), Arc::clone(&d));
            Box::pin(async move {
                active.fetch_add(1, Ordering::SeqCst);
                let _released = gate.acquire().await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(ProcessingOutcome::Completed)
            })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(5));
        pump.init(pipeline, CriticalError::default(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(10)).unwrap();

        wait_until(|| active.load(Ordering::SeqCst) == 10).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(active.load(Ordering::SeqCst), 10);
        assert_eq!(broker.depth("sales"), 5);

        gate.add_permits(15);
        wait_until(|| done.load(Ordering::SeqCst) == 15).await;
        pump.stop().await.unwrap();
        assert_eq!(broker.depth("sales"), 0);
    }

    #[tokio::test]
    async fn failed_receives_are_returned_to_the_queue() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        enqueue(&broker, "sales", "m1");

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pipeline = entry(move |_| -> BoxFuture<'static, StageResult> {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                match attempt {
                    1 => Ok(ProcessingOutcome::RetryRequested),
                    2 => Err(ProcessingError::Handler(anyhow::anyhow!("boom"))),
                    _ => Ok(ProcessingOutcome::Completed),
                }
            })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(5));
        pump.init(pipeline, CriticalError::default(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(1)).unwrap();

        wait_until(|| attempts.load(Ordering::SeqCst) >= 3).await;
        pump.stop().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(broker.depth("sales"), 0);
    }

    #[tokio::test]
    async fn expired_messages_are_discarded_unprocessed() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        let mut queued = QueuedMessage::new(IncomingMessage::new("stale", Headers::new(), Vec::new()));
        queued.discard_after = Some(Utc::now() - chrono::Duration::seconds(1));
        broker.queue("sales").unwrap().push(queued);
        enqueue(&broker, "sales", "fresh");

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let pipeline = entry(move |push| -> BoxFuture<'static, StageResult> {
            record.lock().unwrap().push(push.message.message_id);
            Box::pin(async { Ok(ProcessingOutcome::Completed) })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(5));
        pump.init(pipeline, CriticalError::default(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(1)).unwrap();

        wait_until(|| !seen.lock().unwrap().is_empty()).await;
        pump.stop().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), ["fresh"]);
    }

    #[tokio::test]
    async fn panics_raise_a_critical_error() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        enqueue(&broker, "sales", "m1");

        let critical = CriticalError::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pipeline = entry(move |_| -> BoxFuture<'static, StageResult> {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if attempt == 1 {
                    panic!("pipeline bug");
                }
                Ok(ProcessingOutcome::Completed)
            })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(5));
        pump.init(pipeline, critical.clone(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(1)).unwrap();

        wait_until(|| attempts.load(Ordering::SeqCst) >= 2).await;
        pump.stop().await.unwrap();
        assert_eq!(critical.raised_count(), 1);
    }

    #[tokio::test]
    async fn stop_reports_messages_still_in_flight() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        enqueue(&broker, "sales", "slow");

        let started = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&started);
        let pipeline = entry(move |_| -> BoxFuture<'static, StageResult> {
            flag.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ProcessingOutcome::Completed)
            })
        });

        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_millis(50));
        pump.init(pipeline, CriticalError::default(), settings("sales")).await.unwrap();
        pump.start(PushRuntimeSettings::new(1)).unwrap();

        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        assert_eq!(
            pump.stop().await.unwrap_err(),
            TransportError::StopTimeout(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn purge_on_startup_empties_the_queue() {
        let broker = InMemoryBroker::new();
        broker.create_queue("sales");
        enqueue(&broker, "sales", "old");

        let mut settings = settings("sales");
        settings.purge_on_startup = true;
        let mut pump = InMemoryMessagePump::new(broker.clone(), Duration::from_secs(1));
        pump.init(
            entry(|_| -> BoxFuture<'static, StageResult> { Box::pin(async { Ok(ProcessingOutcome::Completed) }) }),
            CriticalError::default(),
            settings,
        )
        .await
        .unwrap();
        assert_eq!(broker.depth("sales"), 0);
    }
}
