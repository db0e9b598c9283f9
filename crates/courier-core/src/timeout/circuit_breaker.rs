//! Escalation of failures that persist over time.

use std::error::Error as StdError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

type TriggerAction = Arc<dyn Fn(&(dyn StdError + Send + Sync + 'static)) + Send + Sync>;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// No failures since the last success.
    Disarmed,
    /// Failing since `since`; triggers once failures outlast the wait.
    Armed { since: Instant, failures: u64 },
    /// The trigger action has run. Only a success resets the breaker.
    Triggered,
}

/// Runs an action once failures have continued, without an intervening
/// success, for longer than `time_to_wait`.
pub struct RepeatedFailuresOverTimeCircuitBreaker {
    name: String,
    time_to_wait: Duration,
    trigger: TriggerAction,
    state: Mutex<BreakerState>,
}

impl RepeatedFailuresOverTimeCircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        time_to_wait: Duration,
        trigger: impl Fn(&(dyn StdError + Send + Sync + 'static)) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            time_to_wait,
            trigger: Arc::new(trigger),
            state: Mutex::new(BreakerState::Disarmed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != BreakerState::Disarmed {
            *state = BreakerState::Disarmed;
            info!(breaker = %self.name, "circuit breaker disarmed");
        }
    }

    pub fn failure(&self, error: &(dyn StdError + Send + Sync + 'static)) {
        let now = Instant::now();
        let fire = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                BreakerState::Disarmed => {
                    *state = BreakerState::Armed {
                        since: now,
                        failures: 1,
                    };
                    warn!(
                        breaker = %self.name,
                        wait_secs = self.time_to_wait.as_secs_f64(),
                        error = %error,
                        "circuit breaker armed"
                    );
                    false
                }
                BreakerState::Armed { since, failures } => {
                    if now.duration_since(since) >= self.time_to_wait {
                        *state = BreakerState::Triggered;
                        warn!(
                            breaker = %self.name,
                            failures = failures + 1,
                            error = %error,
                            "circuit breaker triggered"
                        );
                        true
                    } else {
                        *state = BreakerState::Armed {
                            since,
                            failures: failures + 1,
                        };
                        false
                    }
                }
                BreakerState::Triggered => false,
            }
        };
        if fire {
            (self.trigger)(error);
        }
    }
}

impl std::fmt::Debug for RepeatedFailuresOverTimeCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedFailuresOverTimeCircuitBreaker")
            .field("name", &self.name)
            .field("time_to_wait", &self.time_to_wait)
            .field("state", &self.state())
            .finish()
    }
}
