use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

type CriticalErrorAction = Arc<dyn Fn(&str, &(dyn StdError + Send + Sync + 'static)) + Send + Sync>;

/// Signals conditions the endpoint cannot recover from on its own.
///
/// Raising always logs. The configured action decides what else happens,
/// typically stopping the endpoint. Clones share the action.
#[derive(Clone)]
pub struct CriticalError {
    action: CriticalErrorAction,
    raised: Arc<AtomicU64>,
}

impl CriticalError {
    pub fn new(action: impl Fn(&str, &(dyn StdError + Send + Sync + 'static)) + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
            raised: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn raise(&self, message: &str, cause: &(dyn StdError + Send + Sync + 'static)) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        error!(error = %cause, "critical error: {message}");
        (self.action)(message, cause);
    }

    /// How many times a critical error has been raised.
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl Default for CriticalError {
    /// Logs only.
    fn default() -> Self {
        Self::new(|_, _| {})
    }
}

impl std::fmt::Debug for CriticalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalError")
            .field("raised", &self.raised_count())
            .finish()
    }
}
