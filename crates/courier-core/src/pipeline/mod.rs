//! Behavior-chain pipeline engine.
//!
//! A pipeline is an ordered chain of behaviors over one context type, ending
//! in a terminator. A connector is a terminator that builds a new context
//! and runs the next chain, so the incoming and outgoing paths are each a
//! series of segments linked by connectors.
//!
//! - `stage` -- `Behavior`, `Terminator`, `Connector` and continuations
//! - `chain` -- the resolved, immutable `Pipeline`
//! - `registration` -- step registration, replacement and assembly
//! - `ordering` -- insert-before/after resolution with cycle detection
//! - `cache` -- resolved pipelines by (name, context type)
//! - `contexts` -- the context type of every segment
//! - `operations` -- send, publish, reply and forward entry points
//! - `incoming` / `outgoing` -- built-in connectors and terminators
//! - `error` -- `StageResult`, `ProcessingOutcome`, `ProcessingError`

pub mod cache;
pub mod chain;
pub mod contexts;
pub mod error;
pub mod incoming;
pub mod operations;
mod ordering;
pub mod outgoing;
pub mod registration;
pub mod stage;

pub use cache::PipelineCache;
pub use chain::Pipeline;
pub use contexts::{
    ExtendableContext, FaultContext, IncomingLogicalContext, InvokeHandlerContext, MessageContext,
    OutgoingLogicalContext, OutgoingPhysicalContext, RoutingContext, TransportReceiveContext,
};
pub use error::{ProcessingError, ProcessingOutcome, StageResult};
pub use operations::{MessageOperations, SendOptions};
pub use registration::{PipelineModifications, StepRegistration};
pub use stage::{
    Behavior, BehaviorDyn, BoxBehavior, BoxFuture, Connector, Next, NextStage, Terminator,
    TerminatorDyn,
};
