//! Message types and handlers.
//!
//! - `Message` -- marker for types that can be sent, with their wire type name
//! - `Handler` -- user code invoked for one message type
//! - `HandlerRegistry` -- ordered handler lists keyed by message type

pub mod registry;

pub use registry::{BoxHandler, Handler, HandlerDyn, HandlerRegistry, Message};
