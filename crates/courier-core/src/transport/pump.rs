//! Receiving side of the transport contract.

use std::future::Future;
use std::sync::Arc;

use courier_types::error::TransportError;
use courier_types::message::IncomingMessage;
use courier_types::transport::{PushRuntimeSettings, PushSettings};

use crate::context::ContextBag;
use crate::pipeline::{BoxFuture, Pipeline, StageResult, TransportReceiveContext};
use crate::recoverability::CriticalError;

/// What a pump hands to the pipeline for each received message.
#[derive(Debug)]
pub struct PushContext {
    pub message: IncomingMessage,
    /// Transport-owned scope; the pipeline runs in a child of it.
    pub extensions: ContextBag,
}

impl PushContext {
    pub fn new(message: IncomingMessage, extensions: ContextBag) -> Self {
        Self {
            message,
            extensions,
        }
    }
}

/// Callback a pump invokes once per received message.
///
/// The returned result tells the pump whether to commit
/// (`Completed`, `MovedToErrorQueue`) or hand the message back
/// (`RetryRequested`, `Err`).
pub type PipelineEntry = Arc<dyn Fn(PushContext) -> BoxFuture<'static, StageResult> + Send + Sync>;

/// Wrap a receive pipeline as a pump entry point.
pub fn pipeline_entry(pipeline: Arc<Pipeline<TransportReceiveContext>>) -> PipelineEntry {
    Arc::new(move |push: PushContext| -> BoxFuture<'static, StageResult> {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            let mut context = TransportReceiveContext::new(push.message, &push.extensions);
            pipeline.invoke(&mut context).await
        })
    })
}

/// Pulls messages from one input queue and feeds them to the pipeline.
///
/// Lifecycle: `init` once, then `start`, then `stop`. While started the
/// pump never runs more than `max_concurrency` pipeline invocations at
/// once, and a failure of one invocation never affects the others.
pub trait PushMessages: Send + Sync {
    fn init(
        &mut self,
        entry: PipelineEntry,
        critical_error: CriticalError,
        settings: PushSettings,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn start(&mut self, limitations: PushRuntimeSettings) -> Result<(), TransportError>;

    /// Stop receiving and wait for in-flight messages, up to a grace period.
    fn stop(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Object-safe version of [`PushMessages`] with boxed futures.
pub trait PushMessagesDyn: Send + Sync {
    fn init_boxed<'a>(
        &'a mut self,
        entry: PipelineEntry,
        critical_error: CriticalError,
        settings: PushSettings,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn start_dyn(&mut self, limitations: PushRuntimeSettings) -> Result<(), TransportError>;

    fn stop_boxed(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

impl<T: PushMessages> PushMessagesDyn for T {
    fn init_boxed<'a>(
        &'a mut self,
        entry: PipelineEntry,
        critical_error: CriticalError,
        settings: PushSettings,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.init(entry, critical_error, settings))
    }

    fn start_dyn(&mut self, limitations: PushRuntimeSettings) -> Result<(), TransportError> {
        self.start(limitations)
    }

    fn stop_boxed(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.stop())
    }
}

/// Type-erased message pump.
pub struct BoxMessagePump {
    inner: Box<dyn PushMessagesDyn>,
}

impl BoxMessagePump {
    pub fn new<T: PushMessages + 'static>(pump: T) -> Self {
        Self {
            inner: Box::new(pump),
        }
    }

    pub async fn init(
        &mut self,
        entry: PipelineEntry,
        critical_error: CriticalError,
        settings: PushSettings,
    ) -> Result<(), TransportError> {
        self.inner.init_boxed(entry, critical_error, settings).await
    }

    pub fn start(&mut self, limitations: PushRuntimeSettings) -> Result<(), TransportError> {
        self.inner.start_dyn(limitations)
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        self.inner.stop_boxed().await
    }
}

impl std::fmt::Debug for BoxMessagePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMessagePump").finish_non_exhaustive()
    }
}
