//! Typed key/value store with parent/child scopes.
//!
//! Every pipeline context carries a `ContextBag`. Connectors hand the next
//! segment a child scope, so stages can read ambient values set by outer
//! stages while their own writes stay local.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

struct Scope {
    values: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    parent: Option<Arc<Scope>>,
}

/// One scope in a chain of scopes, keyed by value type.
///
/// Lookups walk up to the parent on a miss. Writes and removals only touch
/// the scope they are called on, so a child never mutates its parent.
/// Cloning produces another handle to the same scope.
#[derive(Clone)]
pub struct ContextBag {
    scope: Arc<Scope>,
}

impl ContextBag {
    /// Create a root scope.
    pub fn new() -> Self {
        Self {
            scope: Arc::new(Scope {
                values: DashMap::new(),
                parent: None,
            }),
        }
    }

    /// Create a child scope whose lookups fall back to this one.
    pub fn child(&self) -> Self {
        Self {
            scope: Arc::new(Scope {
                values: DashMap::new(),
                parent: Some(Arc::clone(&self.scope)),
            }),
        }
    }

    /// Store a value in this scope, replacing any previous value of the same type.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.scope.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Look up a value of type `T`, walking up through parent scopes.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        let key = TypeId::of::<T>();
        let mut current = Some(&self.scope);
        while let Some(scope) = current {
            if let Some(value) = scope.values.get(&key) {
                return value.value().downcast_ref::<T>().cloned();
            }
            current = scope.parent.as_ref();
        }
        None
    }

    /// Whether a value of type `T` is visible from this scope.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        let key = TypeId::of::<T>();
        let mut current = Some(&self.scope);
        while let Some(scope) = current {
            if scope.values.contains_key(&key) {
                return true;
            }
            current = scope.parent.as_ref();
        }
        false
    }

    /// Remove a value of type `T` from this scope only.
    ///
    /// Returns `true` if a value was removed. A value of the same type set on
    /// a parent scope stays visible afterwards.
    pub fn remove<T: Send + Sync + 'static>(&self) -> bool {
        self.scope.values.remove(&TypeId::of::<T>()).is_some()
    }

    /// Number of scopes between this one and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.scope.parent.as_ref();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent.as_ref();
        }
        depth
    }
}

impl Default for ContextBag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBag")
            .field("local_values", &self.scope.values.len())
            .field("depth", &self.depth())
            .finish()
    }
}
