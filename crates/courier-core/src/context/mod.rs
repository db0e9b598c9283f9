//! Hierarchical, typed extension storage threaded through pipeline stages.
//!
//! - `bag` -- `ContextBag` with parent/child scopes keyed by type

pub mod bag;

pub use bag::ContextBag;
