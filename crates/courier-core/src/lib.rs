//! Processing core for Courier endpoints.
//!
//! This crate defines the behavior-chain pipeline engine, the transport
//! contract that queueing backends implement, routing resolution, and the
//! recoverability stages (first-level retries, fault forwarding, timeout
//! satellites). It depends only on `courier-types` -- never on
//! `courier-infra` or any concrete transport.

pub mod context;
pub mod endpoint;
pub mod handler;
pub mod pipeline;
pub mod recoverability;
pub mod routing;
pub mod serialization;
pub mod timeout;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
