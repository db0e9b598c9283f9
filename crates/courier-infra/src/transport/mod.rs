//! In-memory reference transport.
//!
//! - `broker` -- shared queues and native subscriptions
//! - `definition` -- `InMemoryTransport`, addressing and capabilities
//! - `dispatcher` -- all-or-nothing batch delivery
//! - `pump` -- semaphore-limited receive loop with drain on stop
//! - `queues` -- queue creation and subscription management

pub mod broker;
pub mod definition;
pub mod dispatcher;
pub mod pump;
pub mod queues;

pub use broker::{InMemoryBroker, InMemoryQueue, QueuedMessage, canonical_address};
pub use definition::InMemoryTransport;
pub use dispatcher::InMemoryDispatcher;
pub use pump::InMemoryMessagePump;
pub use queues::{InMemoryQueueCreator, InMemorySubscriptionManager};
