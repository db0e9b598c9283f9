//! Endpoint configuration types.
//!
//! `EndpointConfig` is the serde shape of an `endpoint.toml` file. It is
//! turned into immutable runtime settings once, when the endpoint starts.

use serde::{Deserialize, Serialize};

use crate::transport::TransportTransactionMode;

/// Top-level configuration for one endpoint.
///
/// All fields except `endpoint_name` have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Logical endpoint name; also the base of the input queue address.
    #[serde(default)]
    pub endpoint_name: String,

    /// Optional instance discriminator appended to the input queue address.
    #[serde(default)]
    pub discriminator: Option<String>,

    /// Queue failed messages are forwarded to.
    #[serde(default = "default_error_queue")]
    pub error_queue: String,

    /// A send-only endpoint never receives, so it runs no pumps or satellites.
    #[serde(default)]
    pub send_only: bool,

    /// Immediate in-process retries before a message is forwarded to the error queue.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum concurrently processed messages per pump. Defaults to the CPU count.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Transaction mode to run in. Defaults to the transport's maximum.
    #[serde(default)]
    pub transaction_mode: Option<TransportTransactionMode>,

    /// Drain the input queue when the endpoint starts.
    #[serde(default)]
    pub purge_on_startup: bool,

    /// Opaque connection information handed to the transport.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Seconds the pump waits for in-flight messages when stopping.
    #[serde(default = "default_stop_grace_period_secs")]
    pub stop_grace_period_secs: u64,

    /// Seconds between full clears of the retry failure counters.
    #[serde(default = "default_failure_cleanup_interval_secs")]
    pub failure_cleanup_interval_secs: u64,

    /// Static message type -> endpoint routes for sends.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Timeout manager settings.
    #[serde(default)]
    pub timeouts: TimeoutManagerConfig,
}

fn default_error_queue() -> String {
    "error".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_stop_grace_period_secs() -> u64 {
    30
}

fn default_failure_cleanup_interval_secs() -> u64 {
    300
}

impl EndpointConfig {
    /// Default configuration for the named endpoint.
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            ..Self::default()
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_name: String::new(),
            discriminator: None,
            error_queue: default_error_queue(),
            send_only: false,
            max_retries: default_max_retries(),
            max_concurrency: None,
            transaction_mode: None,
            purge_on_startup: false,
            connection_string: None,
            stop_grace_period_secs: default_stop_grace_period_secs(),
            failure_cleanup_interval_secs: default_failure_cleanup_interval_secs(),
            routes: Vec::new(),
            timeouts: TimeoutManagerConfig::default(),
        }
    }
}

/// Route all sends of `message_type` to `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub message_type: String,
    pub endpoint: String,
}

/// Settings for the timeout manager satellites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutManagerConfig {
    /// Allow the timeout manager to run when the transport lacks delayed delivery.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Send deferred messages to another endpoint's timeout manager instead.
    #[serde(default)]
    pub alternate_address: Option<String>,

    /// Seconds storage failures may persist before a critical error is raised.
    #[serde(default = "default_critical_error_wait_secs")]
    pub critical_error_wait_secs: u64,

    /// Concurrency of each timeout satellite pump.
    #[serde(default = "default_satellite_concurrency")]
    pub max_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_critical_error_wait_secs() -> u64 {
    2
}

fn default_satellite_concurrency() -> usize {
    1
}

impl Default for TimeoutManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alternate_address: None,
            critical_error_wait_secs: default_critical_error_wait_secs(),
            max_concurrency: default_satellite_concurrency(),
        }
    }
}
