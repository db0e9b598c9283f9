use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use super::chain::Pipeline;

/// Resolved pipelines keyed by (pipeline name, context type).
///
/// Filled once at startup; afterwards stages look chains up here instead of
/// resolving step ordering again.
#[derive(Default)]
pub struct PipelineCache {
    pipelines: DashMap<(String, TypeId), Arc<dyn Any + Send + Sync>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<C: Send + 'static>(&self, pipeline: Arc<Pipeline<C>>) {
        let key = (pipeline.name().to_string(), TypeId::of::<C>());
        self.pipelines.insert(key, pipeline);
    }

    pub fn get<C: Send + 'static>(&self, name: &str) -> Option<Arc<Pipeline<C>>> {
        let key = (name.to_string(), TypeId::of::<C>());
        let entry = self.pipelines.get(&key)?;
        Arc::clone(entry.value()).downcast::<Pipeline<C>>().ok()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}
