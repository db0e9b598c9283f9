//! Outgoing routing.
//!
//! - `table` -- static message type -> endpoint routes
//! - `resolver` -- turns send/publish/reply intent into routing strategies

pub mod resolver;
pub mod table;

pub use resolver::{RoutingError, RoutingResolver, StaticSubscribers, SubscriberLookup};
pub use table::UnicastRoutingTable;
