use crate::error::StoreError;
use crate::watch::WatchEvent;
use async_trait::async_trait;
use evsrc_models::{HasStatus, ObjectKey, Resource};
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Local read-only view of one resource type, fed by a watch stream.
#[async_trait]
pub trait ResourceCache<R: Resource>: Send + Sync {
    async fn lookup(&self, key: &ObjectKey) -> Option<Arc<R>>;

    async fn list(&self) -> Vec<Arc<R>>;

    /// Register interest in changes. Every add, update and delete after this
    /// call is delivered on the returned channel in write order.
    async fn subscribe(&self) -> flume::Receiver<WatchEvent<R>>;
}

/// Authoritative store for spec and metadata writes.
///
/// `update` is a compare-and-swap on `resource_version` and never touches the
/// status subtree. `delete` of an object that still carries finalizers only
/// stamps `deletion_timestamp`; the object disappears once an update leaves
/// it without finalizers, and that update returns the final state.
#[async_trait]
pub trait ResourceStore<R: Resource>: Send + Sync {
    async fn create(&self, obj: R) -> StoreResult<R>;

    async fn get(&self, key: &ObjectKey) -> StoreResult<R>;

    async fn update(&self, obj: R) -> StoreResult<R>;

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;
}

/// Status subtree writer with optimistic concurrency.
#[async_trait]
pub trait StatusWriter<R: HasStatus>: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when `expected_resource_version`
    /// is stale.
    async fn update_status(
        &self,
        key: &ObjectKey,
        expected_resource_version: u64,
        status: R::Status,
    ) -> StoreResult<R>;
}

/// Everything the controller needs for one resource type: cached reads,
/// spec/metadata writes and status writes.
pub trait ResourceBackend<R: HasStatus>:
    ResourceCache<R> + ResourceStore<R> + StatusWriter<R>
{
}

impl<R, T> ResourceBackend<R> for T
where
    R: HasStatus,
    T: ResourceCache<R> + ResourceStore<R> + StatusWriter<R>,
{
}
