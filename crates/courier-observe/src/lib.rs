//! Observability for Courier endpoints: subscriber setup and the span field
//! names used when instrumenting message processing.

pub mod messaging_attrs;
pub mod tracing_setup;
