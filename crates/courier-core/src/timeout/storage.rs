//! Timeout persistence contract.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_types::timeout::{TimeoutData, TimeoutsChunk};
use thiserror::Error;

use crate::context::ContextBag;
use crate::pipeline::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutStorageError {
    #[error("timeout storage is unavailable: {0}")]
    Unavailable(String),

    #[error("timeout '{0}' already exists")]
    Duplicate(String),

    #[error("timeout storage failed: {0}")]
    Other(String),
}

/// Stores deferred messages until they are due.
///
/// `next_chunk` must return every stored timeout with a due time at or
/// before now and after `start_slice`, plus the time the caller should
/// query again.
pub trait TimeoutStorage: Send + Sync {
    fn add(
        &self,
        timeout: TimeoutData,
        context: &ContextBag,
    ) -> impl Future<Output = Result<(), TimeoutStorageError>> + Send;

    fn peek(
        &self,
        timeout_id: &str,
        context: &ContextBag,
    ) -> impl Future<Output = Result<Option<TimeoutData>, TimeoutStorageError>> + Send;

    /// Remove a timeout; `false` if it was already gone.
    fn try_remove(
        &self,
        timeout_id: &str,
        context: &ContextBag,
    ) -> impl Future<Output = Result<bool, TimeoutStorageError>> + Send;

    fn next_chunk(
        &self,
        start_slice: DateTime<Utc>,
    ) -> impl Future<Output = Result<TimeoutsChunk, TimeoutStorageError>> + Send;
}

/// Object-safe version of [`TimeoutStorage`].
pub trait TimeoutStorageDyn: Send + Sync {
    fn add_boxed<'a>(
        &'a self,
        timeout: TimeoutData,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TimeoutStorageError>>;

    fn peek_boxed<'a>(
        &'a self,
        timeout_id: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<Option<TimeoutData>, TimeoutStorageError>>;

    fn try_remove_boxed<'a>(
        &'a self,
        timeout_id: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<bool, TimeoutStorageError>>;

    fn next_chunk_boxed(
        &self,
        start_slice: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<TimeoutsChunk, TimeoutStorageError>>;
}

impl<T: TimeoutStorage> TimeoutStorageDyn for T {
    fn add_boxed<'a>(
        &'a self,
        timeout: TimeoutData,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<(), TimeoutStorageError>> {
        Box::pin(self.add(timeout, context))
    }

    fn peek_boxed<'a>(
        &'a self,
        timeout_id: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<Option<TimeoutData>, TimeoutStorageError>> {
        Box::pin(self.peek(timeout_id, context))
    }

    fn try_remove_boxed<'a>(
        &'a self,
        timeout_id: &'a str,
        context: &'a ContextBag,
    ) -> BoxFuture<'a, Result<bool, TimeoutStorageError>> {
        Box::pin(self.try_remove(timeout_id, context))
    }

    fn next_chunk_boxed(
        &self,
        start_slice: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<TimeoutsChunk, TimeoutStorageError>> {
        Box::pin(self.next_chunk(start_slice))
    }
}

/// Type-erased, cloneable timeout storage.
#[derive(Clone)]
pub struct BoxTimeoutStorage {
    inner: Arc<dyn TimeoutStorageDyn>,
}

impl BoxTimeoutStorage {
    pub fn new<T: TimeoutStorage + 'static>(storage: T) -> Self {
        Self {
            inner: Arc::new(storage),
        }
    }

    pub fn from_arc<T: TimeoutStorage + 'static>(storage: Arc<T>) -> Self {
        Self { inner: storage }
    }

    pub async fn add(&self, timeout: TimeoutData, context: &ContextBag) -> Result<(), TimeoutStorageError> {
        self.inner.add_boxed(timeout, context).await
    }

    pub async fn peek(
        &self,
        timeout_id: &str,
        context: &ContextBag,
    ) -> Result<Option<TimeoutData>, TimeoutStorageError> {
        self.inner.peek_boxed(timeout_id, context).await
    }

    pub async fn try_remove(&self, timeout_id: &str, context: &ContextBag) -> Result<bool, TimeoutStorageError> {
        self.inner.try_remove_boxed(timeout_id, context).await
    }

    pub async fn next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutsChunk, TimeoutStorageError> {
        self.inner.next_chunk_boxed(start_slice).await
    }
}

impl std::fmt::Debug for BoxTimeoutStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTimeoutStorage").finish_non_exhaustive()
    }
}
