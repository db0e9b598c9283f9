//! Delayed delivery for transports without native support.
//!
//! Deferred messages are re-addressed to the storage satellite, persisted,
//! and sent on to their destination by the dispatch satellite once a
//! background poller finds them due.
//!
//! - `storage` -- the persistence contract
//! - `deferral` -- routing stage that re-addresses delayed messages
//! - `store` / `dispatch` -- the two satellite terminators
//! - `poller` -- finds due timeouts and triggers their dispatch
//! - `circuit_breaker` -- escalates persistent storage failures
//! - `recoverability` -- retry-then-forward stage shared by both satellites

pub mod circuit_breaker;
pub mod deferral;
pub mod dispatch;
pub mod poller;
pub mod recoverability;
pub mod storage;
pub mod store;

pub use circuit_breaker::{BreakerState, RepeatedFailuresOverTimeCircuitBreaker};
pub use deferral::{ROUTE_DEFERRED_STEP, RouteDeferredMessageToTimeoutManagerBehavior};
pub use dispatch::DispatchTimeoutTerminator;
pub use poller::{ExpiredTimeoutsPoller, PollError, PollerHandle};
pub use recoverability::{MAX_TIMEOUT_RETRIES, TIMEOUT_RECOVERABILITY_STEP, TimeoutRecoverabilityBehavior};
pub use storage::{BoxTimeoutStorage, TimeoutStorage, TimeoutStorageDyn, TimeoutStorageError};
pub use store::StoreTimeoutTerminator;

/// Satellite pipeline and queue qualifier for storing timeouts.
pub const STORAGE_SATELLITE: &str = "Timeouts";

/// Satellite pipeline and queue qualifier for dispatching due timeouts.
pub const DISPATCH_SATELLITE: &str = "TimeoutsDispatcher";
