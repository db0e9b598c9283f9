//! Shared domain types for Courier.
//!
//! This crate contains the envelope model used across a Courier endpoint:
//! incoming/outgoing messages, well-known headers, routing strategies,
//! delivery constraints, transport operation shapes, timeout records,
//! endpoint configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod headers;
pub mod message;
pub mod routing;
pub mod timeout;
pub mod transport;
pub mod wire;
