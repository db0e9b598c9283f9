//! Step registrations and pipeline assembly.

use std::any::{Any, TypeId};
use std::sync::Arc;

use courier_types::error::ConfigurationError;

use super::chain::Pipeline;
use super::ordering::resolve_order;
use super::stage::{Behavior, BoxBehavior, Connected, Connector, Terminator};

/// A behavior registered under a unique step id, with optional ordering
/// constraints relative to other steps.
pub struct StepRegistration {
    id: String,
    description: String,
    context_type: TypeId,
    context_name: &'static str,
    behavior: Arc<dyn Any + Send + Sync>,
    insert_before: Vec<String>,
    insert_after: Vec<String>,
}

impl StepRegistration {
    pub fn new<B: Behavior + 'static>(
        id: impl Into<String>,
        behavior: B,
        description: impl Into<String>,
    ) -> Self {
        Self::from_box(id, BoxBehavior::new(behavior), description)
    }

    /// Register an already boxed behavior.
    pub fn from_box<C: Send + 'static>(
        id: impl Into<String>,
        behavior: BoxBehavior<C>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            context_type: TypeId::of::<C>(),
            context_name: std::any::type_name::<C>(),
            behavior: Arc::new(behavior),
            insert_before: Vec::new(),
            insert_after: Vec::new(),
        }
    }

    /// Run this step before the step with id `step`.
    pub fn insert_before(mut self, step: impl Into<String>) -> Self {
        self.insert_before.push(step.into());
        self
    }

    /// Run this step after the step with id `step`.
    pub fn insert_after(mut self, step: impl Into<String>) -> Self {
        self.insert_after.push(step.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Type name of the context this step runs against.
    pub fn context_name(&self) -> &'static str {
        self.context_name
    }

    pub(crate) fn before(&self) -> &[String] {
        &self.insert_before
    }

    pub(crate) fn after(&self) -> &[String] {
        &self.insert_after
    }

    fn behavior_for<C: Send + 'static>(&self) -> Option<BoxBehavior<C>> {
        if self.context_type != TypeId::of::<C>() {
            return None;
        }
        self.behavior.downcast_ref::<BoxBehavior<C>>().cloned()
    }
}

impl std::fmt::Debug for StepRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistration")
            .field("id", &self.id)
            .field("context", &self.context_name)
            .field("insert_before", &self.insert_before)
            .field("insert_after", &self.insert_after)
            .finish()
    }
}

/// Mutable set of step registrations for one named pipeline.
///
/// Collected during configuration, then resolved into immutable
/// [`Pipeline`]s (one per context type) when the endpoint starts.
pub struct PipelineModifications {
    name: String,
    steps: Vec<StepRegistration>,
    replacements: Vec<StepRegistration>,
}

impl PipelineModifications {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            replacements: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a step. Step ids are unique within a pipeline.
    pub fn register(&mut self, step: StepRegistration) -> Result<&mut Self, ConfigurationError> {
        if self.contains(step.id()) {
            return Err(ConfigurationError::DuplicateStep(step.id().to_string()));
        }
        self.steps.push(step);
        Ok(self)
    }

    /// Swap the behavior of an existing step, keeping its position and
    /// ordering constraints. The target id is checked when the pipeline is
    /// built, so steps registered later can still be replaced.
    pub fn replace<B: Behavior + 'static>(
        &mut self,
        id: impl Into<String>,
        behavior: B,
        description: impl Into<String>,
    ) -> &mut Self {
        self.replacements
            .push(StepRegistration::new(id, behavior, description));
        self
    }

    /// Move every step and replacement from `other` into this pipeline.
    pub fn extend(&mut self, other: PipelineModifications) -> Result<&mut Self, ConfigurationError> {
        for step in other.steps {
            self.register(step)?;
        }
        self.replacements.extend(other.replacements);
        Ok(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id() == id)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepRegistration> {
        self.steps.iter()
    }

    /// Ids of every registered step in resolved order, across all context types.
    pub fn resolved_step_ids(&self) -> Result<Vec<String>, ConfigurationError> {
        let steps = self.effective_steps()?;
        let order = resolve_order(&steps)?;
        Ok(order.into_iter().map(|i| steps[i].id().to_string()).collect())
    }

    /// Resolve the chain for context type `T::Context`, ending in `terminator`.
    pub fn build<T>(&self, terminator: T) -> Result<Pipeline<T::Context>, ConfigurationError>
    where
        T: Terminator + 'static,
    {
        let steps = self.effective_steps()?;
        let order = resolve_order(&steps)?;
        let chain = order
            .into_iter()
            .filter_map(|i| {
                let step = &steps[i];
                step.behavior_for::<T::Context>()
                    .map(|behavior| (step.id().to_string(), behavior))
            })
            .collect();
        Ok(Pipeline::from_parts(
            self.name.clone(),
            chain,
            Arc::new(terminator),
        ))
    }

    /// Resolve the chain for `K::Upstream`, ending in `connector`, which in
    /// turn runs `downstream`.
    pub fn build_connected<K>(
        &self,
        connector: K,
        downstream: Arc<Pipeline<K::Downstream>>,
    ) -> Result<Pipeline<K::Upstream>, ConfigurationError>
    where
        K: Connector + 'static,
    {
        self.build(Connected::new(connector, downstream))
    }

    /// Registered steps with replacements applied.
    fn effective_steps(&self) -> Result<Vec<StepRegistration>, ConfigurationError> {
        let mut steps: Vec<StepRegistration> = self
            .steps
            .iter()
            .map(|s| StepRegistration {
                id: s.id.clone(),
                description: s.description.clone(),
                context_type: s.context_type,
                context_name: s.context_name,
                behavior: Arc::clone(&s.behavior),
                insert_before: s.insert_before.clone(),
                insert_after: s.insert_after.clone(),
            })
            .collect();

        for replacement in &self.replacements {
            let target = steps
                .iter_mut()
                .find(|s| s.id == replacement.id)
                .ok_or_else(|| ConfigurationError::ReplaceUnknownStep(replacement.id.clone()))?;
            target.behavior = Arc::clone(&replacement.behavior);
            target.context_type = replacement.context_type;
            target.context_name = replacement.context_name;
            target.description = replacement.description.clone();
        }
        Ok(steps)
    }
}

impl std::fmt::Debug for PipelineModifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineModifications")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("replacements", &self.replacements.len())
            .finish()
    }
}
