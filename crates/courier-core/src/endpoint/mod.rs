//! Endpoint assembly and lifecycle.
//!
//! `EndpointConfiguration` collects handlers, pipeline steps and
//! collaborators; `start` resolves settings, builds every pipeline, creates
//! queues and starts the pumps and background tasks, handing back a
//! `RunningEndpoint` that owns them until `stop`.

pub mod builder;
pub mod running;
pub mod session;
pub mod settings;

use courier_types::error::{ConfigurationError, TransportError};
use thiserror::Error;

pub use builder::{EndpointConfiguration, MAIN_PIPELINE};
pub use running::RunningEndpoint;
pub use session::MessageSession;
pub use settings::{
    EndpointSettings, Feature, FeatureContext, FeatureState, Prerequisite, TimeoutManagerSettings,
    timeout_manager_feature,
};

/// Why an endpoint failed to start or stop cleanly.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint configuration is invalid: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}
