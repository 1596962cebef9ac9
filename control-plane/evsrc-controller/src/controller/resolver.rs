use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use evsrc_models::{KReference, api_group};
use evsrc_store::{StoreError, StoreResult};
use tokio::sync::RwLock;

/// Turns a sink reference into a deliverable address.
#[async_trait]
pub trait SinkResolver: Send + Sync {
    /// `NotFound` when the referenced object does not exist (yet).
    async fn resolve(&self, namespace: &str, reference: &KReference) -> StoreResult<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct AddressKey {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

impl AddressKey {
    fn new(namespace: &str, r: &KReference) -> Self {
        Self {
            group: api_group(&r.api_version).to_string(),
            kind: r.kind.clone(),
            namespace: namespace.to_string(),
            name: r.name.clone(),
        }
    }
}

/// Resolver backed by a table of addressable objects. Core `Service`
/// references resolve to their cluster DNS name when a domain is configured.
#[derive(Clone, Default)]
pub struct MemoryResolver {
    addresses: Arc<RwLock<HashMap<AddressKey, String>>>,
    cluster_domain: Option<String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Self {
        self.cluster_domain = Some(domain.into());
        self
    }

    pub async fn register(&self, namespace: &str, reference: &KReference, url: impl Into<String>) {
        self.addresses
            .write()
            .await
            .insert(AddressKey::new(namespace, reference), url.into());
    }

    pub async fn unregister(&self, namespace: &str, reference: &KReference) {
        self.addresses
            .write()
            .await
            .remove(&AddressKey::new(namespace, reference));
    }
}

#[async_trait]
impl SinkResolver for MemoryResolver {
    async fn resolve(&self, namespace: &str, reference: &KReference) -> StoreResult<String> {
        let key = AddressKey::new(namespace, reference);
        if let Some(url) = self.addresses.read().await.get(&key) {
            return Ok(url.clone());
        }
        match &self.cluster_domain {
            Some(domain) if key.group.is_empty() && key.kind == "Service" => {
                Ok(format!("http://{}.{}.svc.{}/", key.name, key.namespace, domain))
            }
            _ => Err(StoreError::NotFound(format!(
                "{} {}/{}",
                reference.kind, namespace, reference.name
            ))),
        }
    }
}
