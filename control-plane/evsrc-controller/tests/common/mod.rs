#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use evsrc_controller::controller::children::ChildObject;
use evsrc_controller::controller::descriptor::{DescriptorRegistry, ProvisionerKind};
use evsrc_controller::controller::events::{EventRecorder, RecordedEvent};
use evsrc_controller::controller::provisioner::{MemoryProvisioner, Provisioners};
use evsrc_controller::controller::resolver::MemoryResolver;
use evsrc_controller::controller::{
    Outcome, Reconcile, ReconcileContext, ReconcileError, ReconcileSettings, SourceReconciler,
};
use evsrc_models::*;
use evsrc_store::memory::MemoryStore;
use evsrc_store::{
    ResourceCache, ResourceStore, StatusWriter, StoreError, StoreResult, WatchEvent,
};
use tokio_util::sync::CancellationToken;

pub const SINK_URI: &str = "http://sink.default.svc.cluster.local/";

type SpecEdit<R> = Box<dyn FnOnce(&mut R) + Send>;

/// Memory store with injectable faults and a count of successful writes.
pub struct FlakyStore<R: HasStatus> {
    pub inner: MemoryStore<R>,
    hang_creates: AtomicBool,
    create_error: Mutex<Option<StoreError>>,
    status_conflicts: AtomicUsize,
    edit_before_status: Mutex<Option<SpecEdit<R>>>,
    mutations: AtomicUsize,
}

impl<R: HasStatus> FlakyStore<R> {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            hang_creates: AtomicBool::new(false),
            create_error: Mutex::new(None),
            status_conflicts: AtomicUsize::new(0),
            edit_before_status: Mutex::new(None),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Creates never complete until cleared.
    pub fn hang_creates(&self, hang: bool) {
        self.hang_creates.store(hang, Ordering::SeqCst);
    }

    /// The next create fails with `err`.
    pub fn fail_next_create(&self, err: StoreError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    /// The next `n` status writes fail with a conflict.
    pub fn conflict_status_writes(&self, n: usize) {
        self.status_conflicts.store(n, Ordering::SeqCst);
    }

    /// Change the stored spec right before the next status write lands,
    /// as a concurrent user edit would.
    pub fn edit_before_next_status(&self, edit: impl FnOnce(&mut R) + Send + 'static) {
        *self.edit_before_status.lock().unwrap() = Some(Box::new(edit));
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn counted<T>(&self, res: StoreResult<T>) -> StoreResult<T> {
        if res.is_ok() {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        res
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<R: HasStatus> ResourceCache<R> for FlakyStore<R> {
    async fn lookup(&self, key: &ObjectKey) -> Option<Arc<R>> {
        self.inner.lookup(key).await
    }

    async fn list(&self) -> Vec<Arc<R>> {
        self.inner.list().await
    }

    async fn subscribe(&self) -> flume::Receiver<WatchEvent<R>> {
        self.inner.subscribe().await
    }
}

#[async_trait]
impl<R: HasStatus> ResourceStore<R> for FlakyStore<R> {
    async fn create(&self, obj: R) -> StoreResult<R> {
        if self.hang_creates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let injected = self.create_error.lock().unwrap().take();
        if let Some(err) = injected {
            return Err(err);
        }
        self.counted(self.inner.create(obj).await)
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<R> {
        self.inner.get(key).await
    }

    async fn update(&self, obj: R) -> StoreResult<R> {
        self.counted(self.inner.update(obj).await)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.counted(self.inner.delete(key).await)
    }
}

#[async_trait]
impl<R: HasStatus> StatusWriter<R> for FlakyStore<R> {
    async fn update_status(
        &self,
        key: &ObjectKey,
        expected_resource_version: u64,
        status: R::Status,
    ) -> StoreResult<R> {
        let edit = self.edit_before_status.lock().unwrap().take();
        if let Some(edit) = edit {
            let mut current = self.inner.get(key).await?;
            edit(&mut current);
            self.inner.update(current).await?;
        }
        if take_one(&self.status_conflicts) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_resource_version,
                actual: expected_resource_version + 1,
            });
        }
        self.counted(
            self.inner
                .update_status(key, expected_resource_version, status)
                .await,
        )
    }
}

/// A reconciler wired to fault-injectable in-memory collaborators.
pub struct Harness {
    pub sources: Arc<FlakyStore<Source>>,
    pub topics: Arc<FlakyStore<Topic>>,
    pub pull_subscriptions: Arc<FlakyStore<PullSubscription>>,
    pub resolver: MemoryResolver,
    pub external: HashMap<ProvisionerKind, MemoryProvisioner>,
    pub events: flume::Receiver<RecordedEvent>,
    pub token: CancellationToken,
    pub reconciler: SourceReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconcileSettings {
            call_timeout: Duration::from_millis(200),
            conflict_retries: 5,
        })
    }

    pub fn with_settings(settings: ReconcileSettings) -> Self {
        let sources = Arc::new(FlakyStore::<Source>::new());
        let topics = Arc::new(FlakyStore::<Topic>::new());
        let pull_subscriptions = Arc::new(FlakyStore::<PullSubscription>::new());
        let resolver = MemoryResolver::new().with_cluster_domain("cluster.local");
        let external: HashMap<_, _> = [
            ProvisionerKind::AuditLogSink,
            ProvisionerKind::StorageNotification,
            ProvisionerKind::SchedulerJob,
        ]
        .into_iter()
        .map(|k| (k, MemoryProvisioner::new(k)))
        .collect();
        let provisioners = external
            .iter()
            .fold(Provisioners::new(), |acc, (k, p)| acc.with(*k, Arc::new(p.clone())));
        let (recorder, events) = EventRecorder::new();
        let token = CancellationToken::new();
        let ctx = ReconcileContext {
            sources: sources.clone(),
            topics: topics.clone(),
            pull_subscriptions: pull_subscriptions.clone(),
            resolver: Arc::new(resolver.clone()),
            provisioners,
            registry: Arc::new(DescriptorRegistry::builtin()),
            recorder,
            settings,
            token: token.clone(),
        };
        Self {
            sources,
            topics,
            pull_subscriptions,
            resolver,
            external,
            events,
            token,
            reconciler: SourceReconciler::new(Arc::new(ctx)),
        }
    }

    pub async fn create(&self, src: Source) -> Source {
        self.sources.inner.create(src).await.unwrap()
    }

    pub async fn source(&self, key: &ObjectKey) -> Source {
        self.sources.inner.get(key).await.unwrap()
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        self.reconciler.reconcile(&key.to_string()).await
    }

    /// Edit the stored source spec the way a user would.
    pub async fn edit(&self, key: &ObjectKey, f: impl FnOnce(&mut Source)) -> Source {
        let mut src = self.source(key).await;
        f(&mut src);
        self.sources.inner.update(src).await.unwrap()
    }

    pub fn provisioner(&self, kind: ProvisionerKind) -> &MemoryProvisioner {
        &self.external[&kind]
    }

    /// Report both children Ready for their current generation.
    pub async fn children_ready(&self, key: &ObjectKey) {
        mark_child_ready(&self.topics.inner, key).await;
        mark_child_ready(&self.pull_subscriptions.inner, key).await;
    }

    /// Reason strings of every event recorded so far.
    pub fn event_reasons(&self) -> Vec<String> {
        self.events.drain().map(|e| e.reason).collect()
    }

    /// Every write any store accepted from the reconciler.
    pub fn mutations(&self) -> usize {
        self.sources.mutations() + self.topics.mutations() + self.pull_subscriptions.mutations()
    }
}

pub async fn mark_child_ready<C: ChildObject>(store: &MemoryStore<C>, key: &ObjectKey) {
    let child = store.get(key).await.unwrap();
    let mut status = child.status().clone();
    status.observed_generation = child.meta().generation;
    status.resource_id = Some(format!("{}-id", key.name));
    status.conditions = vec![Condition {
        type_: READY.into(),
        status: ConditionStatus::True,
        reason: None,
        message: None,
        last_transition_time: None,
    }];
    store
        .update_status(key, child.meta().resource_version, status)
        .await
        .unwrap();
}

pub fn source(kind: &str, name: &str, topic: &str) -> Source {
    Source::new(
        kind,
        "default",
        name,
        SourceSpec {
            topic: topic.into(),
            sink: Destination::uri(SINK_URI),
            ..Default::default()
        },
    )
}

pub fn audit_source(name: &str, topic: &str) -> Source {
    source(CLOUD_AUDIT_LOGS_SOURCE, name, topic)
}

pub fn condition(src: &Source, type_: &str) -> Condition {
    get_condition(&src.status.conditions, type_)
        .cloned()
        .unwrap_or_else(|| panic!("{type_} missing from {:?}", src.status.conditions))
}

pub fn broker(name: &str) -> KReference {
    KReference {
        api_version: "eventing.knative.dev/v1".into(),
        kind: "Broker".into(),
        namespace: String::new(),
        name: name.into(),
    }
}
