use std::collections::HashSet;
use std::time::Duration;

use courier_core::transport::{
    BoxDispatcher, BoxMessagePump, BoxQueueCreator, BoxSubscriptionManager, ReceiveInfrastructure,
    SendInfrastructure, TransportDefinition, TransportInfrastructure,
};
use courier_types::config::EndpointConfig;
use courier_types::delivery::DeliveryConstraintKind;
use courier_types::error::ConfigurationError;
use courier_types::routing::{EndpointInstance, LogicalAddress, OutboundRoutingPolicy, OutboundRoutingType};
use courier_types::transport::{TransportCapabilities, TransportTransactionMode};
use tracing::debug;

use super::broker::{InMemoryBroker, canonical_address};
use super::dispatcher::InMemoryDispatcher;
use super::pump::InMemoryMessagePump;
use super::queues::{InMemoryQueueCreator, InMemorySubscriptionManager};

/// Process-local transport.
///
/// Addresses have the form `endpoint[-discriminator][.qualifier]`. Receives
/// are `ReceiveOnly`, publishes use native multicast, and the only delivery
/// constraint honoured is time-to-be-received. Delays go through the
/// timeout manager.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
}

impl InMemoryTransport {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn capabilities() -> TransportCapabilities {
        TransportCapabilities {
            transaction_mode: TransportTransactionMode::ReceiveOnly,
            outbound_routing_policy: OutboundRoutingPolicy::new(
                OutboundRoutingType::Unicast,
                OutboundRoutingType::Multicast,
                OutboundRoutingType::Unicast,
            ),
            delivery_constraints: HashSet::from([DeliveryConstraintKind::DiscardIfNotReceivedBefore]),
        }
    }
}

impl TransportDefinition for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn to_transport_address(&self, address: &LogicalAddress) -> String {
        address.to_string()
    }

    fn make_canonical_form(&self, address: &str) -> String {
        canonical_address(address)
    }

    fn initialize(&self, config: &EndpointConfig) -> Result<TransportInfrastructure, ConfigurationError> {
        debug!(endpoint = %config.endpoint_name, "initializing in-memory transport");
        let stop_grace_period = Duration::from_secs(config.stop_grace_period_secs);

        let broker = self.broker.clone();
        let infrastructure = TransportInfrastructure::new(Self::capabilities(), move |_| {
            let broker = broker.clone();
            SendInfrastructure::new(move || BoxDispatcher::new(InMemoryDispatcher::new(broker.clone())))
        });
        if config.send_only {
            return Ok(infrastructure);
        }

        let broker = self.broker.clone();
        let mut instance = EndpointInstance::new(config.endpoint_name.clone());
        if let Some(discriminator) = &config.discriminator {
            instance = instance.with_discriminator(discriminator.clone());
        }
        let local_address = self.to_transport_address(&LogicalAddress::for_instance(instance));
        let subscriptions_broker = self.broker.clone();

        Ok(infrastructure
            .with_receive(move |_| {
                let (pumps, queues) = (broker.clone(), broker.clone());
                ReceiveInfrastructure::new(
                    move || BoxMessagePump::new(InMemoryMessagePump::new(pumps.clone(), stop_grace_period)),
                    move || BoxQueueCreator::new(InMemoryQueueCreator::new(queues.clone())),
                )
            })
            .with_subscriptions(move || {
                BoxSubscriptionManager::new(InMemorySubscriptionManager::new(
                    subscriptions_broker.clone(),
                    local_address.clone(),
                ))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_include_discriminator_and_qualifier() {
        let transport = InMemoryTransport::default();
        let instance = EndpointInstance::new("Sales").with_discriminator("blue");
        let address = LogicalAddress::for_instance(instance).qualified("Timeouts");
        assert_eq!(transport.to_transport_address(&address), "Sales-blue.Timeouts");
        assert_eq!(transport.make_canonical_form(" Sales-Blue "), "sales-blue");
    }

    #[test]
    fn send_only_endpoints_get_no_receive_side() {
        let transport = InMemoryTransport::default();
        let mut config = EndpointConfig::new("Sales");
        config.send_only = true;

        let infrastructure = transport.initialize(&config).unwrap();
        assert!(infrastructure.configure_receive_infrastructure(None).is_none());
        assert!(infrastructure.configure_subscription_infrastructure().is_none());
    }

    #[test]
    fn declares_native_multicast_and_time_to_be_received() {
        let capabilities = InMemoryTransport::capabilities();
        assert!(capabilities.supports(DeliveryConstraintKind::DiscardIfNotReceivedBefore));
        assert!(!capabilities.supports_delayed_delivery());
        assert_eq!(capabilities.outbound_routing_policy.publishes, OutboundRoutingType::Multicast);
    }
}
