//! Transport contract implemented by queueing backends.
//!
//! - `definition` -- `TransportDefinition`, infrastructure factories,
//!   transaction-mode negotiation and pre-startup checks
//! - `dispatch` -- `DispatchMessages` + `BoxDispatcher`
//! - `pump` -- `PushMessages` + `BoxMessagePump` and the pipeline entry
//! - `queue` -- `CreateQueues` + `QueueBindings`
//! - `subscription` -- `ManageSubscriptions` for native multicast

pub mod definition;
pub mod dispatch;
pub mod pump;
pub mod queue;
pub mod subscription;

pub use definition::{
    PreStartupCheck, ReceiveInfrastructure, SendInfrastructure, TransportDefinition,
    TransportInfrastructure, negotiate_transaction_mode, run_pre_startup_check,
};
pub use dispatch::{BoxDispatcher, DispatchMessages, DispatchMessagesDyn};
pub use pump::{BoxMessagePump, PipelineEntry, PushContext, PushMessages, PushMessagesDyn, pipeline_entry};
pub use queue::{BoxQueueCreator, CreateQueues, CreateQueuesDyn, QueueBindings};
pub use subscription::{BoxSubscriptionManager, ManageSubscriptions, ManageSubscriptionsDyn};
