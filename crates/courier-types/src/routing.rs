//! Routing strategies, outbound routing policy, and logical addresses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::MessageIntent;

/// How a single outgoing message reaches its receivers.
///
/// Resolved once per outgoing message and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Deliver to exactly one transport address.
    Unicast { destination: String },
    /// Let the transport fan the message out to every subscriber of the type.
    Multicast { message_type: String },
}

impl RoutingStrategy {
    pub fn unicast(destination: impl Into<String>) -> Self {
        Self::Unicast {
            destination: destination.into(),
        }
    }

    pub fn multicast(message_type: impl Into<String>) -> Self {
        Self::Multicast {
            message_type: message_type.into(),
        }
    }

    /// The unicast destination, if this is a unicast strategy.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Unicast { destination } => Some(destination),
            Self::Multicast { .. } => None,
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast { destination } => write!(f, "unicast:{destination}"),
            Self::Multicast { message_type } => write!(f, "multicast:{message_type}"),
        }
    }
}

/// Native delivery semantics a transport offers for one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundRoutingType {
    Unicast,
    Multicast,
}

/// Per-operation-kind routing semantics declared by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRoutingPolicy {
    pub sends: OutboundRoutingType,
    pub publishes: OutboundRoutingType,
    pub replies: OutboundRoutingType,
}

impl OutboundRoutingPolicy {
    pub fn new(
        sends: OutboundRoutingType,
        publishes: OutboundRoutingType,
        replies: OutboundRoutingType,
    ) -> Self {
        Self {
            sends,
            publishes,
            replies,
        }
    }

    /// Unicast for everything; publishes need message-driven subscriptions.
    pub fn all_unicast() -> Self {
        Self::new(
            OutboundRoutingType::Unicast,
            OutboundRoutingType::Unicast,
            OutboundRoutingType::Unicast,
        )
    }

    /// Routing type that applies to the given intent.
    pub fn for_intent(&self, intent: MessageIntent) -> OutboundRoutingType {
        match intent {
            MessageIntent::Publish => self.publishes,
            MessageIntent::Reply => self.replies,
            MessageIntent::Send | MessageIntent::Subscribe | MessageIntent::Unsubscribe => {
                self.sends
            }
        }
    }
}

/// One physical instance of a logical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointInstance {
    pub endpoint: String,
    pub discriminator: Option<String>,
    /// Transport-specific properties such as the host machine.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl EndpointInstance {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for EndpointInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, "-{discriminator}")?;
        }
        Ok(())
    }
}

/// Transport-independent address of a queue owned by an endpoint instance.
///
/// The qualifier distinguishes satellite queues (e.g. `Timeouts`) from the
/// instance's main input queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalAddress {
    pub instance: EndpointInstance,
    pub qualifier: Option<String>,
}

impl LogicalAddress {
    /// The main input queue of an instance.
    pub fn for_instance(instance: EndpointInstance) -> Self {
        Self {
            instance,
            qualifier: None,
        }
    }

    /// Address of a remote endpoint, with no discriminator or qualifier.
    pub fn for_remote_endpoint(endpoint: impl Into<String>) -> Self {
        Self::for_instance(EndpointInstance::new(endpoint))
    }

    /// A sibling address on the same instance with the given qualifier.
    pub fn qualified(&self, qualifier: impl Into<String>) -> Self {
        Self {
            instance: self.instance.clone(),
            qualifier: Some(qualifier.into()),
        }
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, ".{qualifier}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_maps_intents_to_operation_kinds() {
        let policy = OutboundRoutingPolicy::new(
            OutboundRoutingType::Unicast,
            OutboundRoutingType::Multicast,
            OutboundRoutingType::Unicast,
        );
        assert_eq!(policy.for_intent(MessageIntent::Publish), OutboundRoutingType::Multicast);
        assert_eq!(policy.for_intent(MessageIntent::Send), OutboundRoutingType::Unicast);
        assert_eq!(policy.for_intent(MessageIntent::Reply), OutboundRoutingType::Unicast);
        assert_eq!(policy.for_intent(MessageIntent::Subscribe), OutboundRoutingType::Unicast);
    }

    #[test]
    fn logical_address_display_includes_discriminator_and_qualifier() {
        let instance = EndpointInstance::new("Sales").with_discriminator("blue");
        let main = LogicalAddress::for_instance(instance);
        assert_eq!(main.to_string(), "Sales-blue");
        assert_eq!(main.qualified("Timeouts").to_string(), "Sales-blue.Timeouts");
        assert_eq!(LogicalAddress::for_remote_endpoint("Billing").to_string(), "Billing");
    }

    #[test]
    fn routing_strategy_serializes_tagged() {
        let json = serde_json::to_value(RoutingStrategy::unicast("error")).unwrap();
        assert_eq!(json["type"], "unicast");
        assert_eq!(json["destination"], "error");
        assert_eq!(RoutingStrategy::multicast("Evt").destination(), None);
    }
}
