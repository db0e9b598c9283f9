//! Stage traits: behaviors, terminators and connectors.
//!
//! Each trait comes in two layers, following the same shape used for the
//! transport seams:
//!
//! - A static trait with RPITIT async methods that implementors write
//!   against (`async fn` in the impl block).
//! - A `*Dyn` object-safe companion that boxes the returned future, with a
//!   blanket impl, so heterogeneous stages can be stored in one chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::chain::Pipeline;
use super::error::StageResult;

/// A pinned, boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// A stage that wraps the rest of its segment.
///
/// A behavior may run code before and after `next`, inspect or replace the
/// result, or return without calling `next` at all. `next` is consumed by
/// running it, so a behavior can continue the chain at most once.
pub trait Behavior: Send + Sync {
    type Context: Send + 'static;

    fn invoke(
        &self,
        context: &mut Self::Context,
        next: Next<Self::Context>,
    ) -> impl Future<Output = StageResult> + Send;
}

/// Object-safe companion of [`Behavior`].
pub trait BehaviorDyn<C>: Send + Sync {
    fn invoke_boxed<'a>(&'a self, context: &'a mut C, next: Next<C>)
    -> BoxFuture<'a, StageResult>;
}

impl<T: Behavior> BehaviorDyn<T::Context> for T {
    fn invoke_boxed<'a>(
        &'a self,
        context: &'a mut T::Context,
        next: Next<T::Context>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(self.invoke(context, next))
    }
}

/// Shared, type-erased behavior for context type `C`.
pub struct BoxBehavior<C> {
    inner: Arc<dyn BehaviorDyn<C>>,
}

impl<C: Send + 'static> BoxBehavior<C> {
    pub fn new<B: Behavior<Context = C> + 'static>(behavior: B) -> Self {
        Self {
            inner: Arc::new(behavior),
        }
    }

    /// Wrap a behavior that is also referenced elsewhere.
    pub fn from_arc<B: Behavior<Context = C> + 'static>(behavior: Arc<B>) -> Self {
        Self { inner: behavior }
    }
}

impl<C> Clone for BoxBehavior<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminator
// ---------------------------------------------------------------------------

/// The last stage of a segment. It has no `next`.
pub trait Terminator: Send + Sync {
    type Context: Send + 'static;

    fn terminate(
        &self,
        context: &mut Self::Context,
    ) -> impl Future<Output = StageResult> + Send;
}

/// Object-safe companion of [`Terminator`].
pub trait TerminatorDyn<C>: Send + Sync {
    fn terminate_boxed<'a>(&'a self, context: &'a mut C) -> BoxFuture<'a, StageResult>;
}

impl<T: Terminator> TerminatorDyn<T::Context> for T {
    fn terminate_boxed<'a>(&'a self, context: &'a mut T::Context) -> BoxFuture<'a, StageResult> {
        Box::pin(self.terminate(context))
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// A stage that ends one segment and starts the next, translating the
/// upstream context into a freshly created downstream context.
///
/// Unlike a behavior, a connector may run its downstream segment any number
/// of times (once per handler, for example).
pub trait Connector: Send + Sync {
    type Upstream: Send + 'static;
    type Downstream: Send + 'static;

    fn connect(
        &self,
        context: &mut Self::Upstream,
        next: NextStage<Self::Downstream>,
    ) -> impl Future<Output = StageResult> + Send;
}

/// Adapts a connector plus its downstream pipeline into a terminator of the
/// upstream segment.
pub(crate) struct Connected<K: Connector> {
    connector: K,
    downstream: Arc<Pipeline<K::Downstream>>,
}

impl<K: Connector> Connected<K> {
    pub(crate) fn new(connector: K, downstream: Arc<Pipeline<K::Downstream>>) -> Self {
        Self {
            connector,
            downstream,
        }
    }
}

impl<K: Connector> Terminator for Connected<K> {
    type Context = K::Upstream;

    fn terminate(&self, context: &mut K::Upstream) -> impl Future<Output = StageResult> + Send {
        self.connector
            .connect(context, NextStage::new(Arc::clone(&self.downstream)))
    }
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

pub(crate) struct Segment<C> {
    pub(crate) behaviors: Vec<BoxBehavior<C>>,
    pub(crate) terminator: Arc<dyn TerminatorDyn<C>>,
}

/// The remainder of a segment after the current behavior.
pub struct Next<C> {
    segment: Arc<Segment<C>>,
    index: usize,
}

impl<C: Send + 'static> Next<C> {
    pub(crate) fn start(segment: Arc<Segment<C>>) -> Self {
        Self { segment, index: 0 }
    }

    /// Run the rest of the segment.
    pub fn run(self, context: &mut C) -> BoxFuture<'_, StageResult> {
        Box::pin(async move {
            let Next { segment, index } = self;
            match segment.behaviors.get(index) {
                Some(behavior) => {
                    let next = Next {
                        segment: Arc::clone(&segment),
                        index: index + 1,
                    };
                    behavior.inner.invoke_boxed(context, next).await
                }
                None => segment.terminator.terminate_boxed(context).await,
            }
        })
    }

    /// Number of stages left to run, including the terminator.
    pub fn remaining(&self) -> usize {
        self.segment.behaviors.len().saturating_sub(self.index) + 1
    }
}

/// Entry point into the segment after a connector.
pub struct NextStage<U> {
    pipeline: Arc<Pipeline<U>>,
}

impl<U: Send + 'static> NextStage<U> {
    pub(crate) fn new(pipeline: Arc<Pipeline<U>>) -> Self {
        Self { pipeline }
    }

    /// Run the downstream segment with a new context.
    pub fn run<'a>(&'a self, context: &'a mut U) -> BoxFuture<'a, StageResult> {
        self.pipeline.invoke(context)
    }
}

impl<U> Clone for NextStage<U> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}
