use std::sync::Arc;

use super::error::StageResult;
use super::stage::{BoxBehavior, BoxFuture, Next, Segment, Terminator, TerminatorDyn};

/// A resolved, immutable behavior chain for one context type.
///
/// Pipelines are built once at startup by
/// [`PipelineModifications`](super::PipelineModifications) and then shared
/// across all concurrent invocations.
pub struct Pipeline<C> {
    name: String,
    step_ids: Vec<String>,
    segment: Arc<Segment<C>>,
}

impl<C: Send + 'static> Pipeline<C> {
    /// A pipeline with no behaviors, only a terminator.
    pub fn terminated<T>(name: impl Into<String>, terminator: T) -> Self
    where
        T: Terminator<Context = C> + 'static,
    {
        Self::from_parts(name.into(), Vec::new(), Arc::new(terminator))
    }

    pub(crate) fn from_parts(
        name: String,
        steps: Vec<(String, BoxBehavior<C>)>,
        terminator: Arc<dyn TerminatorDyn<C>>,
    ) -> Self {
        let (step_ids, behaviors) = steps.into_iter().unzip();
        Self {
            name,
            step_ids,
            segment: Arc::new(Segment {
                behaviors,
                terminator,
            }),
        }
    }

    /// Run the whole chain against `context`.
    pub fn invoke<'a>(&'a self, context: &'a mut C) -> BoxFuture<'a, StageResult> {
        Next::start(Arc::clone(&self.segment)).run(context)
    }

    /// Name of the pipeline this chain was built from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids of the behaviors in execution order.
    pub fn step_ids(&self) -> &[String] {
        &self.step_ids
    }
}

impl<C> std::fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("context", &std::any::type_name::<C>())
            .field("step_ids", &self.step_ids)
            .finish()
    }
}
