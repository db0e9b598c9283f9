//! Values for the OpenTelemetry messaging semantic-convention attributes
//! recorded on transport spans.
//!
//! Field names are written inline in the span macros
//! (`messaging.system`, `messaging.operation.type`, ...); this module holds
//! the values shared between transports.

// --- Operation type values ---

pub const OP_PROCESS: &str = "process";

pub const OP_SEND: &str = "send";

// --- System values ---

/// The in-memory reference transport.
pub const SYSTEM_IN_MEMORY: &str = "courier.in_memory";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_value_is_namespaced() {
        assert!(SYSTEM_IN_MEMORY.starts_with("courier."));
        assert_ne!(OP_PROCESS, OP_SEND);
    }
}
