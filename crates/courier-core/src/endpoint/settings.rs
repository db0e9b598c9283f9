//! Immutable runtime settings and feature activation.

use std::time::Duration;

use courier_types::config::EndpointConfig;
use courier_types::error::ConfigurationError;
use courier_types::routing::{EndpointInstance, LogicalAddress};
use courier_types::transport::{TransportCapabilities, TransportTransactionMode};
use tracing::{debug, info};

use crate::timeout::{DISPATCH_SATELLITE, STORAGE_SATELLITE};
use crate::transport::TransportDefinition;

/// Addresses and limits of the timeout satellites, when they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutManagerSettings {
    pub storage_address: String,
    pub dispatcher_address: String,
    pub critical_error_wait: Duration,
    pub max_concurrency: usize,
}

/// Settings resolved once at start and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub endpoint_name: String,
    pub instance: EndpointInstance,
    /// `None` for send-only endpoints.
    pub local_address: Option<String>,
    pub error_queue: String,
    pub send_only: bool,
    pub transaction_mode: TransportTransactionMode,
    pub max_concurrency: Option<usize>,
    pub max_retries: u32,
    pub purge_on_startup: bool,
    pub failure_cleanup_interval: Duration,
    /// Where deferred messages are sent when the transport cannot delay them.
    pub timeout_manager_address: Option<String>,
    /// Set when this endpoint hosts the timeout satellites itself.
    pub timeout_manager: Option<TimeoutManagerSettings>,
}

impl EndpointSettings {
    /// Validate `config` against the transport and freeze it.
    pub fn resolve(
        config: &EndpointConfig,
        transport: &dyn TransportDefinition,
        capabilities: &TransportCapabilities,
    ) -> Result<Self, ConfigurationError> {
        if config.endpoint_name.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                name: "endpoint_name".into(),
                reason: "an endpoint needs a name".into(),
            });
        }
        if config.error_queue.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                name: "error_queue".into(),
                reason: "an error queue is required".into(),
            });
        }
        if config.max_concurrency == Some(0) {
            return Err(ConfigurationError::InvalidSetting {
                name: "max_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }

        let transaction_mode =
            crate::transport::negotiate_transaction_mode(capabilities.transaction_mode, config.transaction_mode)?;

        let mut instance = EndpointInstance::new(config.endpoint_name.clone());
        if let Some(discriminator) = &config.discriminator {
            instance = instance.with_discriminator(discriminator.clone());
        }
        let instance = transport.bind_to_local_endpoint(instance, config);
        let main_address = LogicalAddress::for_instance(instance.clone());
        let local_address = (!config.send_only).then(|| transport.to_transport_address(&main_address));

        let context = FeatureContext {
            config,
            capabilities,
        };
        let timeout_manager = match timeout_manager_feature().evaluate(&context) {
            FeatureState::Active => Some(TimeoutManagerSettings {
                storage_address: transport.to_transport_address(&main_address.qualified(STORAGE_SATELLITE)),
                dispatcher_address: transport
                    .to_transport_address(&main_address.qualified(DISPATCH_SATELLITE)),
                critical_error_wait: Duration::from_secs(config.timeouts.critical_error_wait_secs),
                max_concurrency: config.timeouts.max_concurrency.max(1),
            }),
            FeatureState::Inactive(reason) => {
                debug!(feature = "TimeoutManager", reason, "feature not activated");
                None
            }
        };

        let timeout_manager_address = timeout_manager
            .as_ref()
            .map(|tm| tm.storage_address.clone())
            .or_else(|| {
                config
                    .timeouts
                    .alternate_address
                    .as_ref()
                    .filter(|_| !capabilities.supports_delayed_delivery())
                    .map(|address| transport.make_canonical_form(address))
            });

        let settings = Self {
            endpoint_name: config.endpoint_name.clone(),
            instance,
            local_address,
            error_queue: transport.make_canonical_form(&config.error_queue),
            send_only: config.send_only,
            transaction_mode,
            max_concurrency: config.max_concurrency,
            max_retries: config.max_retries,
            purge_on_startup: config.purge_on_startup,
            failure_cleanup_interval: Duration::from_secs(config.failure_cleanup_interval_secs.max(1)),
            timeout_manager_address,
            timeout_manager,
        };
        info!(
            endpoint = %settings.endpoint_name,
            local_address = settings.local_address.as_deref().unwrap_or("<send-only>"),
            transaction_mode = %settings.transaction_mode,
            timeout_manager = settings.timeout_manager.is_some(),
            "endpoint settings resolved"
        );
        Ok(settings)
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// What a feature's prerequisites may look at.
pub struct FeatureContext<'a> {
    pub config: &'a EndpointConfig,
    pub capabilities: &'a TransportCapabilities,
}

/// A named condition a feature needs to activate.
pub struct Prerequisite {
    pub description: &'static str,
    pub check: fn(&FeatureContext<'_>) -> bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureState {
    Active,
    /// The first prerequisite that did not hold.
    Inactive(&'static str),
}

/// An optional part of the endpoint, activated when all of its
/// prerequisites hold. Prerequisites are checked in order.
pub struct Feature {
    pub name: &'static str,
    pub prerequisites: Vec<Prerequisite>,
}

impl Feature {
    pub fn evaluate(&self, context: &FeatureContext<'_>) -> FeatureState {
        self.prerequisites
            .iter()
            .find(|p| !(p.check)(context))
            .map_or(FeatureState::Active, |p| FeatureState::Inactive(p.description))
    }
}

/// Timeout satellites, for transports that cannot delay delivery natively.
pub fn timeout_manager_feature() -> Feature {
    Feature {
        name: "TimeoutManager",
        prerequisites: vec![
            Prerequisite {
                description: "The timeout manager has been disabled",
                check: |c| c.config.timeouts.enabled,
            },
            Prerequisite {
                description: "Send only endpoints can't use the timeout manager since it requires receive capabilities",
                check: |c| !c.config.send_only,
            },
            Prerequisite {
                description: "A user configured timeout manager address has been found and this endpoint will send timeouts to that endpoint",
                check: |c| c.config.timeouts.alternate_address.is_none(),
            },
            Prerequisite {
                description: "The selected transport supports delayed delivery natively",
                check: |c| !c.capabilities.supports_delayed_delivery(),
            },
        ],
    }
}
