//! Routing resolution for outgoing messages.
//!
//! The resolver is built once at startup. Message type routes are translated
//! to transport addresses at that point, so resolution itself is a pure
//! lookup: the same input always produces the same strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use courier_types::message::MessageIntent;
use courier_types::routing::{LogicalAddress, OutboundRoutingPolicy, OutboundRoutingType, RoutingStrategy};
use thiserror::Error;

use super::table::UnicastRoutingTable;
use crate::pipeline::OutgoingLogicalContext;
use crate::transport::TransportDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no destination specified for message '{0}': add a route or set an explicit destination")]
    NoDestination(String),

    #[error("message '{0}' has no reply-to address to reply to")]
    NoReplyToAddress(String),

    #[error("cannot route to this endpoint: send-only endpoints have no input queue")]
    NoLocalAddress,

    #[error(
        "publishing '{0}' requires a transport with native multicast or a subscriber lookup"
    )]
    PublishNotSupported(String),

    #[error("the transport does not support native subscriptions")]
    SubscriptionsNotSupported,

    #[error("delayed delivery through the timeout manager needs exactly one unicast destination (message '{0}')")]
    DelayedDeliveryRequiresUnicast(String),
}

/// Source of subscriber addresses for transports without native multicast.
pub trait SubscriberLookup: Send + Sync {
    /// Transport addresses subscribed to `message_type`, in a stable order.
    fn subscribers_for(&self, message_type: &str) -> Vec<String>;
}

/// Subscriber addresses fixed at configuration time.
#[derive(Debug, Clone, Default)]
pub struct StaticSubscribers {
    by_type: HashMap<String, Vec<String>>,
}

impl StaticSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message_type: impl Into<String>, address: impl Into<String>) -> &mut Self {
        self.by_type
            .entry(message_type.into())
            .or_default()
            .push(address.into());
        self
    }
}

impl SubscriberLookup for StaticSubscribers {
    fn subscribers_for(&self, message_type: &str) -> Vec<String> {
        self.by_type.get(message_type).cloned().unwrap_or_default()
    }
}

/// Resolves routing strategies from message intent and options.
pub struct RoutingResolver {
    routes: HashMap<String, String>,
    local_address: Option<String>,
    policy: OutboundRoutingPolicy,
    subscribers: Option<Arc<dyn SubscriberLookup>>,
}

impl RoutingResolver {
    pub fn new(
        table: &UnicastRoutingTable,
        transport: &dyn TransportDefinition,
        local_address: Option<String>,
        policy: OutboundRoutingPolicy,
    ) -> Self {
        let routes = table
            .iter()
            .map(|(message_type, endpoint)| {
                let address = LogicalAddress::for_remote_endpoint(endpoint);
                (message_type.to_string(), transport.to_transport_address(&address))
            })
            .collect();
        Self {
            routes,
            local_address,
            policy,
            subscribers: None,
        }
    }

    pub fn with_subscribers(mut self, lookup: Arc<dyn SubscriberLookup>) -> Self {
        self.subscribers = Some(lookup);
        self
    }

    /// Strategies for the message in `context`, based on its intent.
    pub fn resolve(&self, context: &OutgoingLogicalContext) -> Result<Vec<RoutingStrategy>, RoutingError> {
        let message_type = context.message.message_type.as_str();
        match context.intent {
            MessageIntent::Publish => self.resolve_publish(message_type),
            MessageIntent::Reply => {
                self.resolve_reply(&context.message_id, context.destination.as_deref())
            }
            MessageIntent::Send | MessageIntent::Subscribe | MessageIntent::Unsubscribe => self
                .resolve_send(
                    message_type,
                    context.destination.as_deref(),
                    context.route_to_this_endpoint,
                ),
        }
    }

    /// Explicit destination, then this endpoint, then the route table.
    pub fn resolve_send(
        &self,
        message_type: &str,
        destination: Option<&str>,
        route_to_this_endpoint: bool,
    ) -> Result<Vec<RoutingStrategy>, RoutingError> {
        if let Some(destination) = destination {
            return Ok(vec![RoutingStrategy::unicast(destination)]);
        }
        if route_to_this_endpoint {
            let local = self
                .local_address
                .as_deref()
                .ok_or(RoutingError::NoLocalAddress)?;
            return Ok(vec![RoutingStrategy::unicast(local)]);
        }
        self.routes
            .get(message_type)
            .map(|address| vec![RoutingStrategy::unicast(address.clone())])
            .ok_or_else(|| RoutingError::NoDestination(message_type.to_string()))
    }

    pub fn resolve_reply(
        &self,
        message_id: &str,
        reply_to: Option<&str>,
    ) -> Result<Vec<RoutingStrategy>, RoutingError> {
        reply_to
            .map(|address| vec![RoutingStrategy::unicast(address)])
            .ok_or_else(|| RoutingError::NoReplyToAddress(message_id.to_string()))
    }

    /// One multicast strategy under a multicast policy, otherwise one
    /// unicast strategy per distinct subscriber.
    pub fn resolve_publish(&self, message_type: &str) -> Result<Vec<RoutingStrategy>, RoutingError> {
        if self.policy.publishes == OutboundRoutingType::Multicast {
            return Ok(vec![RoutingStrategy::multicast(message_type)]);
        }
        let lookup = self
            .subscribers
            .as_ref()
            .ok_or_else(|| RoutingError::PublishNotSupported(message_type.to_string()))?;

        let mut seen = HashSet::new();
        Ok(lookup
            .subscribers_for(message_type)
            .into_iter()
            .filter(|address| seen.insert(address.clone()))
            .map(RoutingStrategy::unicast)
            .collect())
    }
}

impl std::fmt::Debug for RoutingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingResolver")
            .field("routes", &self.routes)
            .field("local_address", &self.local_address)
            .field("policy", &self.policy)
            .field("has_subscribers", &self.subscribers.is_some())
            .finish()
    }
}
