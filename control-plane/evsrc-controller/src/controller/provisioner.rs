use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use evsrc_models::{ObjectKey, Resource, Source};
use evsrc_store::{StoreError, StoreResult};
use tokio::sync::RwLock;
use tracing::info;

use super::descriptor::ProvisionerKind;

/// Creates and removes the provider-side resource that publishes into a
/// source's topic (audit log sink, bucket notification, scheduler job).
/// Both calls must be idempotent.
#[async_trait]
pub trait ExternalProvisioner: Send + Sync {
    /// Make sure the resource exists and publishes to `topic_id`; returns
    /// its identifier.
    async fn ensure(&self, source: &Source, topic_id: &str) -> StoreResult<String>;

    /// Remove the resource. Succeeds when it is already gone.
    async fn release(&self, source: &Source) -> StoreResult<()>;
}

/// Provisioners by kind.
#[derive(Clone, Default)]
pub struct Provisioners {
    by_kind: HashMap<ProvisionerKind, Arc<dyn ExternalProvisioner>>,
}

impl Provisioners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ProvisionerKind, p: Arc<dyn ExternalProvisioner>) -> Self {
        self.by_kind.insert(kind, p);
        self
    }

    pub fn get(&self, kind: ProvisionerKind) -> Option<&Arc<dyn ExternalProvisioner>> {
        self.by_kind.get(&kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalRecord {
    pub id: String,
    pub topic_id: String,
}

/// In-memory provisioner keyed by source identity.
#[derive(Clone)]
pub struct MemoryProvisioner {
    kind: ProvisionerKind,
    records: Arc<RwLock<HashMap<ObjectKey, ExternalRecord>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryProvisioner {
    pub fn new(kind: ProvisionerKind) -> Self {
        Self {
            kind,
            records: Arc::new(RwLock::new(HashMap::new())),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<ExternalRecord> {
        self.records.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Creates, updates and removals performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalProvisioner for MemoryProvisioner {
    async fn ensure(&self, source: &Source, topic_id: &str) -> StoreResult<String> {
        if source.metadata.uid.is_empty() {
            return Err(StoreError::Invalid(format!("{} has no uid", source.key())));
        }
        let mut records = self.records.write().await;
        let key = source.key();
        if let Some(existing) = records.get(&key) {
            if existing.topic_id == topic_id {
                return Ok(existing.id.clone());
            }
        }
        let record = ExternalRecord {
            id: format!("{}-{}", self.kind.id_prefix(), source.metadata.uid),
            topic_id: topic_id.to_string(),
        };
        info!(%key, id = %record.id, topic_id, "provisioner: publishing into topic");
        records.insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record.id)
    }

    async fn release(&self, source: &Source) -> StoreResult<()> {
        let key = source.key();
        if let Some(record) = self.records.write().await.remove(&key) {
            info!(%key, id = %record.id, "provisioner: released");
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
