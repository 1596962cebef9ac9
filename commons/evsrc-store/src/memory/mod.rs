use async_trait::async_trait;
use chrono::Utc;
use evsrc_models::{HasStatus, ObjectKey, Resource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::StoreError;
use crate::traits::*;
use crate::watch::WatchEvent;

struct Inner<R> {
    objects: HashMap<ObjectKey, Arc<R>>,
    subscribers: Vec<flume::Sender<WatchEvent<R>>>,
    revision: u64,
}

impl<R: Resource> Inner<R> {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn publish(&mut self, event: WatchEvent<R>) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn existing(&self, key: &ObjectKey) -> StoreResult<Arc<R>> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn check_version(&self, key: &ObjectKey, current: &R, expected: u64) -> StoreResult<()> {
        let actual = current.meta().resource_version;
        if actual != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// In-memory backing store that doubles as the watch cache for one resource
/// type. Writes are applied and fanned out to subscribers under one lock, so
/// subscribers observe them in write order.
pub struct MemoryStore<R> {
    inner: Arc<RwLock<Inner<R>>>,
}

impl<R> Clone for MemoryStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                objects: HashMap::new(),
                subscribers: Vec::new(),
                revision: 0,
            })),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<R: Resource> ResourceCache<R> for MemoryStore<R> {
    async fn lookup(&self, key: &ObjectKey) -> Option<Arc<R>> {
        self.inner.read().await.objects.get(key).cloned()
    }

    async fn list(&self) -> Vec<Arc<R>> {
        self.inner.read().await.objects.values().cloned().collect()
    }

    async fn subscribe(&self) -> flume::Receiver<WatchEvent<R>> {
        let (tx, rx) = flume::unbounded();
        self.inner.write().await.subscribers.push(tx);
        rx
    }
}

#[async_trait]
impl<R: HasStatus> ResourceStore<R> for MemoryStore<R> {
    async fn create(&self, mut obj: R) -> StoreResult<R> {
        let key = obj.key();
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let revision = inner.next_revision();
        let meta = obj.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.generation = 1;
        meta.resource_version = revision;
        let stored = Arc::new(obj);
        inner.objects.insert(key.clone(), stored.clone());
        inner.publish(WatchEvent::Added(stored.clone()));
        trace!(%key, revision, "memory store: created");
        Ok((*stored).clone())
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<R> {
        let inner = self.inner.read().await;
        inner.existing(key).map(|o| (*o).clone())
    }

    async fn update(&self, mut obj: R) -> StoreResult<R> {
        let key = obj.key();
        let mut inner = self.inner.write().await;
        let current = inner.existing(&key)?;
        inner.check_version(&key, &current, obj.meta().resource_version)?;

        let bump = current.spec_differs(&obj);
        {
            let prev = current.meta();
            let meta = obj.meta_mut();
            meta.uid = prev.uid.clone();
            meta.generation = prev.generation + i64::from(bump);
            meta.deletion_timestamp = prev.deletion_timestamp;
        }
        *obj.status_mut() = current.status().clone();
        if obj.meta().is_deleting() && obj.meta().finalizers.is_empty() {
            inner.objects.remove(&key);
            let gone = Arc::new(obj);
            inner.publish(WatchEvent::Deleted(gone.clone()));
            trace!(%key, "memory store: last finalizer removed, object deleted");
            return Ok((*gone).clone());
        }
        let revision = inner.next_revision();
        obj.meta_mut().resource_version = revision;
        let stored = Arc::new(obj);
        inner.objects.insert(key.clone(), stored.clone());
        inner.publish(WatchEvent::Modified(stored.clone()));
        trace!(%key, revision, bump, "memory store: updated");
        Ok((*stored).clone())
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let current = inner.existing(key)?;
        if current.meta().finalizers.is_empty() {
            inner.objects.remove(key);
            inner.publish(WatchEvent::Deleted(current));
            trace!(%key, "memory store: deleted");
            return Ok(());
        }
        if current.meta().is_deleting() {
            return Ok(());
        }
        let revision = inner.next_revision();
        let mut marked = (*current).clone();
        marked.meta_mut().deletion_timestamp = Some(Utc::now());
        marked.meta_mut().resource_version = revision;
        let stored = Arc::new(marked);
        inner.objects.insert(key.clone(), stored.clone());
        inner.publish(WatchEvent::Modified(stored));
        trace!(%key, "memory store: deletion requested, finalizers pending");
        Ok(())
    }
}

#[async_trait]
impl<R: HasStatus> StatusWriter<R> for MemoryStore<R> {
    async fn update_status(
        &self,
        key: &ObjectKey,
        expected_resource_version: u64,
        status: R::Status,
    ) -> StoreResult<R> {
        let mut inner = self.inner.write().await;
        let current = inner.existing(key)?;
        inner.check_version(key, &current, expected_resource_version)?;
        let revision = inner.next_revision();
        let mut next = (*current).clone();
        *next.status_mut() = status;
        next.meta_mut().resource_version = revision;
        let stored = Arc::new(next);
        inner.objects.insert(key.clone(), stored.clone());
        inner.publish(WatchEvent::Modified(stored.clone()));
        trace!(%key, revision, "memory store: status updated");
        Ok((*stored).clone())
    }
}
