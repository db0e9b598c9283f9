//! Background polling for due timeouts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_types::error::TransportError;
use courier_types::headers;
use courier_types::message::{Headers, MessageIntent, OutgoingMessage};
use courier_types::routing::RoutingStrategy;
use courier_types::transport::{TransportOperation, TransportOperations};
use tokio::task::JoinHandle;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::circuit_breaker::RepeatedFailuresOverTimeCircuitBreaker;
use super::storage::{BoxTimeoutStorage, TimeoutStorageError};
use crate::context::ContextBag;
use crate::transport::BoxDispatcher;

/// Upper bound on the wait between two storage queries.
pub const MAX_NEXT_RETRIEVAL_DELAY: Duration = Duration::from_secs(60);

const POLLING_INTERVAL: Duration = Duration::from_secs(1);
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Why a polling round stopped early.
#[derive(Debug, Error)]
pub enum PollError {
    /// The storage query failed. Counts against the connectivity breaker.
    #[error("failed to fetch timeouts from the timeout storage: {0}")]
    Storage(#[from] TimeoutStorageError),

    /// The control message for a due timeout could not be sent. The timeout
    /// stays in storage and is requested again on the next query.
    #[error("failed to request dispatch of timeout '{timeout_id}': {source}")]
    Dispatch {
        timeout_id: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug)]
struct Schedule {
    next_retrieval: DateTime<Utc>,
    start_slice: DateTime<Utc>,
    /// A timeout was stored while a query was in flight.
    timeout_pushed: bool,
}

/// Queries timeout storage for due timeouts and asks the dispatch satellite
/// to send each one on, using a control message carrying its id.
pub struct ExpiredTimeoutsPoller {
    storage: BoxTimeoutStorage,
    dispatcher: BoxDispatcher,
    dispatcher_address: String,
    breaker: RepeatedFailuresOverTimeCircuitBreaker,
    schedule: Mutex<Schedule>,
}

impl ExpiredTimeoutsPoller {
    pub fn new(
        storage: BoxTimeoutStorage,
        dispatcher: BoxDispatcher,
        dispatcher_address: impl Into<String>,
        breaker: RepeatedFailuresOverTimeCircuitBreaker,
    ) -> Self {
        let now = Utc::now();
        Self {
            storage,
            dispatcher,
            dispatcher_address: dispatcher_address.into(),
            breaker,
            schedule: Mutex::new(Schedule {
                next_retrieval: now,
                start_slice: now - chrono::Duration::days(3650),
                timeout_pushed: false,
            }),
        }
    }

    /// When the next storage query will run.
    pub fn next_retrieval(&self) -> DateTime<Utc> {
        self.schedule().next_retrieval
    }

    /// Pull the next query forward if `due` is earlier than planned.
    pub fn new_timeout_registered(&self, due: DateTime<Utc>) {
        let mut schedule = self.schedule();
        if schedule.next_retrieval > due {
            schedule.next_retrieval = due;
        }
        schedule.timeout_pushed = true;
    }

    /// Run one query if one is due, dispatching every due timeout found.
    ///
    /// The start slice only moves past a timeout once its dispatch request
    /// went out, so a failed request is picked up again by the next query.
    pub async fn spin_once(&self) -> Result<(), PollError> {
        let start_slice = {
            let schedule = self.schedule();
            if schedule.next_retrieval > Utc::now() {
                return Ok(());
            }
            schedule.start_slice
        };

        let chunk = self.storage.next_chunk(start_slice).await?;
        self.breaker.success();

        for due in &chunk.due_timeouts {
            if let Err(source) = self.request_dispatch(&due.id).await {
                let mut schedule = self.schedule();
                let before_failed = due.due_time - chrono::Duration::nanoseconds(1);
                if schedule.start_slice > before_failed {
                    schedule.start_slice = before_failed;
                }
                return Err(PollError::Dispatch {
                    timeout_id: due.id.clone(),
                    source,
                });
            }
            let mut schedule = self.schedule();
            if schedule.start_slice < due.due_time {
                schedule.start_slice = due.due_time;
            }
        }

        let mut schedule = self.schedule();
        if !schedule.timeout_pushed || chunk.next_time_to_query < schedule.next_retrieval {
            schedule.next_retrieval = chunk.next_time_to_query;
        }
        schedule.timeout_pushed = false;

        let cap = Utc::now() + chrono::Duration::seconds(MAX_NEXT_RETRIEVAL_DELAY.as_secs() as i64);
        if schedule.next_retrieval > cap {
            schedule.next_retrieval = cap;
        }
        debug!(
            due = chunk.due_timeouts.len(),
            next_retrieval = %schedule.next_retrieval,
            "polled timeout storage"
        );
        Ok(())
    }

    /// Spawn the polling loop.
    pub fn start(self: &Arc<Self>) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                let pause = match poller.spin_once().await {
                    Ok(()) => POLLING_INTERVAL,
                    Err(PollError::Storage(e)) => {
                        warn!(error = %e, "Failed to fetch timeouts from the timeout storage");
                        poller.breaker.failure(&e);
                        FAILURE_BACKOFF
                    }
                    Err(e @ PollError::Dispatch { .. }) => {
                        warn!(error = %e, "due timeout not handed to the dispatcher, retrying");
                        FAILURE_BACKOFF
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        });
        PollerHandle { cancel, task }
    }

    async fn request_dispatch(&self, timeout_id: &str) -> Result<(), TransportError> {
        let mut message_headers = Headers::new();
        message_headers.insert(headers::CONTROL_MESSAGE.to_string(), "true".to_string());
        message_headers.insert(
            headers::MESSAGE_INTENT.to_string(),
            MessageIntent::Send.as_str().to_string(),
        );
        message_headers.insert(headers::TIMEOUT_ID_TO_DISPATCH.to_string(), timeout_id.to_string());
        let request = OutgoingMessage::new(Uuid::now_v7().to_string(), message_headers, Vec::new());

        let operation = TransportOperation::new(request, RoutingStrategy::unicast(&self.dispatcher_address));
        self.dispatcher
            .dispatch(TransportOperations::new([operation]), &ContextBag::new())
            .await
    }

    fn schedule(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ExpiredTimeoutsPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiredTimeoutsPoller")
            .field("dispatcher_address", &self.dispatcher_address)
            .field("schedule", &*self.schedule())
            .finish_non_exhaustive()
    }
}

/// Running poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "timeout poller ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use courier_types::error::TransportError;
    use courier_types::timeout::{DueTimeout, TimeoutData, TimeoutsChunk};

    use super::*;
    use crate::testing::MapTimeoutStorage;
    use crate::timeout::TimeoutStorage;
    use crate::transport::DispatchMessages;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<TransportOperations>>,
    }

    impl DispatchMessages for Recording {
        async fn dispatch(&self, operations: TransportOperations, _context: &ContextBag) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(operations);
            Ok(())
        }
    }

    /// Fails the calls whose 1-based index is listed, or every call.
    struct FlakyDispatcher {
        fail_calls: Vec<usize>,
        fail_all: bool,
        calls: AtomicUsize,
        requested: Mutex<Vec<String>>,
    }

    impl FlakyDispatcher {
        fn failing_calls(fail_calls: &[usize]) -> Self {
            Self {
                fail_calls: fail_calls.to_vec(),
                fail_all: false,
                calls: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn down() -> Self {
            Self {
                fail_all: true,
                ..Self::failing_calls(&[])
            }
        }
    }

    impl DispatchMessages for FlakyDispatcher {
        async fn dispatch(&self, operations: TransportOperations, _context: &ContextBag) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_all || self.fail_calls.contains(&call) {
                return Err(TransportError::Dispatch("broker unreachable".into()));
            }
            let mut requested = self.requested.lock().unwrap();
            for op in &operations.unicast {
                requested.push(op.message.header(headers::TIMEOUT_ID_TO_DISPATCH).unwrap().to_string());
            }
            Ok(())
        }
    }

    fn stored(id: &str, time: DateTime<Utc>) -> TimeoutData {
        TimeoutData {
            id: id.into(),
            destination: "Sales".into(),
            state: Vec::new(),
            time,
            headers: Headers::new(),
            owning_timeout_manager: "Sales".into(),
        }
    }

    /// Hands out a fixed set of due ids once, then nothing.
    struct ScriptedStorage {
        due: Mutex<Vec<DueTimeout>>,
        next: DateTime<Utc>,
        failing: AtomicBool,
        queries: AtomicUsize,
    }

    impl ScriptedStorage {
        fn new(ids: &[&str], next: DateTime<Utc>) -> Self {
            Self {
                due: Mutex::new(
                    ids.iter()
                        .map(|id| DueTimeout {
                            id: id.to_string(),
                            due_time: Utc::now(),
                        })
                        .collect(),
                ),
                next,
                failing: AtomicBool::new(false),
                queries: AtomicUsize::new(0),
            }
        }
    }

    impl TimeoutStorage for ScriptedStorage {
        async fn add(&self, _timeout: TimeoutData, _context: &ContextBag) -> Result<(), TimeoutStorageError> {
            Ok(())
        }

        async fn peek(&self, _id: &str, _context: &ContextBag) -> Result<Option<TimeoutData>, TimeoutStorageError> {
            Ok(None)
        }

        async fn try_remove(&self, _id: &str, _context: &ContextBag) -> Result<bool, TimeoutStorageError> {
            Ok(false)
        }

        async fn next_chunk(&self, _start_slice: DateTime<Utc>) -> Result<TimeoutsChunk, TimeoutStorageError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TimeoutStorageError::Unavailable("connection refused".into()));
            }
            Ok(TimeoutsChunk {
                due_timeouts: std::mem::take(&mut *self.due.lock().unwrap()),
                next_time_to_query: self.next,
            })
        }
    }

    fn poller(
        storage: Arc<ScriptedStorage>,
        dispatcher: Arc<Recording>,
        breaker: RepeatedFailuresOverTimeCircuitBreaker,
    ) -> Arc<ExpiredTimeoutsPoller> {
        Arc::new(ExpiredTimeoutsPoller::new(
            BoxTimeoutStorage::from_arc(storage),
            BoxDispatcher::from_arc(dispatcher),
            "sales.TimeoutsDispatcher",
            breaker,
        ))
    }

    fn quiet_breaker() -> RepeatedFailuresOverTimeCircuitBreaker {
        RepeatedFailuresOverTimeCircuitBreaker::new("TimeoutStorageConnectivity", Duration::from_secs(2), |_| {})
    }

    #[tokio::test]
    async fn due_timeouts_become_dispatch_requests() {
        let storage = Arc::new(ScriptedStorage::new(&["t-1", "t-2"], Utc::now() + chrono::Duration::seconds(30)));
        let dispatcher = Arc::new(Recording::default());
        let poller = poller(storage, dispatcher.clone(), quiet_breaker());

        poller.spin_once().await.unwrap();

        let sent = dispatcher.sent.lock().unwrap();
        let ids: Vec<_> = sent
            .iter()
            .flat_map(|ops| ops.unicast.iter())
            .map(|op| {
                assert_eq!(op.destination, "sales.TimeoutsDispatcher");
                assert_eq!(op.message.header(headers::CONTROL_MESSAGE), Some("true"));
                op.message.header(headers::TIMEOUT_ID_TO_DISPATCH).unwrap().to_string()
            })
            .collect();
        assert_eq!(ids, vec!["t-1", "t-2"]);
    }

    #[tokio::test]
    async fn next_query_is_capped_at_one_minute() {
        let storage = Arc::new(ScriptedStorage::new(&[], Utc::now() + chrono::Duration::hours(3)));
        let poller = poller(storage, Arc::new(Recording::default()), quiet_breaker());

        poller.spin_once().await.unwrap();
        assert!(poller.next_retrieval() <= Utc::now() + chrono::Duration::seconds(60));
        assert!(poller.next_retrieval() > Utc::now() + chrono::Duration::seconds(50));
    }

    #[tokio::test]
    async fn no_query_before_next_retrieval() {
        let storage = Arc::new(ScriptedStorage::new(&[], Utc::now() + chrono::Duration::seconds(30)));
        let poller = poller(storage.clone(), Arc::new(Recording::default()), quiet_breaker());

        poller.spin_once().await.unwrap();
        poller.spin_once().await.unwrap();
        assert_eq!(storage.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registered_timeout_pulls_next_query_forward() {
        let storage = Arc::new(ScriptedStorage::new(&[], Utc::now() + chrono::Duration::seconds(30)));
        let poller = poller(storage, Arc::new(Recording::default()), quiet_breaker());
        poller.spin_once().await.unwrap();

        let soon = Utc::now() + chrono::Duration::seconds(5);
        poller.new_timeout_registered(soon);
        assert_eq!(poller.next_retrieval(), soon);

        poller.new_timeout_registered(Utc::now() + chrono::Duration::seconds(20));
        assert_eq!(poller.next_retrieval(), soon);
    }

    #[tokio::test]
    async fn failed_request_is_retried_on_the_next_query() {
        let now = Utc::now();
        let storage = Arc::new(MapTimeoutStorage::with([
            stored("t-early", now - chrono::Duration::seconds(10)),
            stored("t-late", now - chrono::Duration::seconds(5)),
        ]));
        let dispatcher = Arc::new(FlakyDispatcher::failing_calls(&[2]));
        let poller = ExpiredTimeoutsPoller::new(
            BoxTimeoutStorage::from_arc(storage),
            BoxDispatcher::from_arc(dispatcher.clone()),
            "sales.TimeoutsDispatcher",
            quiet_breaker(),
        );

        let err = poller.spin_once().await.unwrap_err();
        assert!(matches!(err, PollError::Dispatch { ref timeout_id, .. } if timeout_id == "t-late"));
        assert_eq!(*dispatcher.requested.lock().unwrap(), ["t-early"]);

        poller.spin_once().await.unwrap();
        assert_eq!(*dispatcher.requested.lock().unwrap(), ["t-early", "t-late"]);
    }

    #[tokio::test]
    async fn failed_request_sharing_a_due_time_is_not_skipped() {
        let due = Utc::now() - chrono::Duration::seconds(3);
        let storage = Arc::new(MapTimeoutStorage::with([stored("t-a", due), stored("t-b", due)]));
        let dispatcher = Arc::new(FlakyDispatcher::failing_calls(&[2]));
        let poller = ExpiredTimeoutsPoller::new(
            BoxTimeoutStorage::from_arc(storage),
            BoxDispatcher::from_arc(dispatcher.clone()),
            "sales.TimeoutsDispatcher",
            quiet_breaker(),
        );

        assert!(poller.spin_once().await.is_err());
        poller.spin_once().await.unwrap();
        assert!(dispatcher.requested.lock().unwrap().iter().any(|id| id == "t-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_failures_do_not_trip_the_storage_breaker() {
        let storage = Arc::new(MapTimeoutStorage::with([stored(
            "t-1",
            Utc::now() - chrono::Duration::seconds(1),
        )]));
        let dispatcher = Arc::new(FlakyDispatcher::down());
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let breaker = RepeatedFailuresOverTimeCircuitBreaker::new(
            "TimeoutStorageConnectivity",
            Duration::from_secs(2),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );
        let poller = Arc::new(ExpiredTimeoutsPoller::new(
            BoxTimeoutStorage::from_arc(storage),
            BoxDispatcher::from_arc(dispatcher.clone()),
            "sales.TimeoutsDispatcher",
            breaker,
        ));

        let handle = poller.start();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(dispatcher.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_storage_failures_trigger_the_breaker() {
        let storage = Arc::new(ScriptedStorage::new(&[], Utc::now()));
        storage.failing.store(true, Ordering::SeqCst);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let breaker = RepeatedFailuresOverTimeCircuitBreaker::new(
            "TimeoutStorageConnectivity",
            Duration::from_secs(2),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );
        let poller = poller(storage.clone(), Arc::new(Recording::default()), breaker);

        let handle = poller.start();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(storage.queries.load(Ordering::SeqCst) >= 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        handle.stop().await;
    }
}
