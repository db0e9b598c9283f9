//! Infrastructure layer for Courier.
//!
//! Contains implementations of the contracts defined in `courier-core`: an
//! in-memory transport with native publish/subscribe, an in-memory timeout
//! storage, and the `endpoint.toml` configuration loader.

pub mod config;
pub mod timeout_storage;
pub mod transport;


pub use timeout_storage::InMemoryTimeoutStorage;
pub use transport::{InMemoryBroker, InMemoryTransport};
