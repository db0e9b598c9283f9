//! Recoverability: what happens when processing a message fails.
//!
//! - `first_level` -- immediate in-process retries with a per-pipeline
//!   `FailureCounter`
//! - `faults` -- forwarding exhausted messages to the error queue
//! - `critical` -- endpoint-fatal conditions and the user callback
//! - `notifications` -- broadcast of retry / error-queue events
//! - `cleaner` -- periodic full clear of failure counters

pub mod cleaner;
pub mod critical;
pub mod faults;
pub mod first_level;
pub mod notifications;

pub use cleaner::{CleanerHandle, ClearFailures, FailureStorageCleaner};
pub use critical::CriticalError;
pub use faults::{
    FORWARDING_FAILURE_LIMIT, MOVE_FAULTS_STEP, MoveFaultsToErrorQueueBehavior, set_exception_headers,
};
pub use first_level::{
    FIRST_LEVEL_RETRIES_STEP, FailureCounter, FirstLevelRetriesBehavior, RetryPolicy,
};
pub use notifications::BusNotifications;
