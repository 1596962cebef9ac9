use std::collections::HashMap;
use std::sync::Arc;

use evsrc_models::{PullSubscription, Source, Topic};
use evsrc_store::ResourceStore;
use evsrc_store::memory::MemoryStore;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::controller::correlator::WatchStreams;
use crate::controller::descriptor::{DescriptorRegistry, ProvisionerKind};
use crate::controller::events::{EventRecorder, run_event_sink};
use crate::controller::provisioner::{MemoryProvisioner, Provisioners};
use crate::controller::resolver::MemoryResolver;
use crate::controller::{
    Controller, ControllerSettings, ReconcileContext, ReconcileSettings, SourceReconciler,
};
use crate::sim::simulate_ready;
use crate::workqueue::WorkQueue;

/// In-memory stand-ins for the cluster: stores that double as watch caches,
/// a sink resolver and one provisioner per external resource kind.
#[derive(Clone)]
pub struct Substrate {
    pub sources: MemoryStore<Source>,
    pub topics: MemoryStore<Topic>,
    pub pull_subscriptions: MemoryStore<PullSubscription>,
    pub resolver: MemoryResolver,
    pub external: HashMap<ProvisionerKind, MemoryProvisioner>,
}

impl Substrate {
    pub fn in_memory() -> Self {
        let external = [
            ProvisionerKind::AuditLogSink,
            ProvisionerKind::StorageNotification,
            ProvisionerKind::SchedulerJob,
        ]
        .into_iter()
        .map(|k| (k, MemoryProvisioner::new(k)))
        .collect();
        Self {
            sources: MemoryStore::new(),
            topics: MemoryStore::new(),
            pull_subscriptions: MemoryStore::new(),
            resolver: MemoryResolver::new().with_cluster_domain("cluster.local"),
            external,
        }
    }

    pub fn provisioners(&self) -> Provisioners {
        self.external
            .iter()
            .fold(Provisioners::new(), |acc, (kind, p)| acc.with(*kind, Arc::new(p.clone())))
    }
}

pub fn registry_from(cfg: &ControllerConfig) -> anyhow::Result<DescriptorRegistry> {
    Ok(match cfg.owned_kinds() {
        Some(kinds) => DescriptorRegistry::only(&kinds)?,
        None => DescriptorRegistry::builtin(),
    })
}

/// Wire a controller over `substrate`. Watches are subscribed here, so
/// nothing written after this call is missed.
pub async fn build_controller(
    cfg: &ControllerConfig,
    substrate: &Substrate,
    recorder: EventRecorder,
    token: CancellationToken,
) -> anyhow::Result<Controller<SourceReconciler>> {
    let registry = Arc::new(registry_from(cfg)?);
    let ctx = ReconcileContext {
        sources: Arc::new(substrate.sources.clone()),
        topics: Arc::new(substrate.topics.clone()),
        pull_subscriptions: Arc::new(substrate.pull_subscriptions.clone()),
        resolver: Arc::new(substrate.resolver.clone()),
        provisioners: substrate.provisioners(),
        registry: registry.clone(),
        recorder,
        settings: ReconcileSettings {
            call_timeout: cfg.call_timeout(),
            conflict_retries: cfg.conflict_retries,
        },
        token,
    };
    let streams = WatchStreams::subscribe(
        &substrate.sources,
        &substrate.topics,
        &substrate.pull_subscriptions,
    )
    .await;
    Ok(Controller::new(
        WorkQueue::new(cfg.backoff_base(), cfg.backoff_max()),
        Arc::new(SourceReconciler::new(Arc::new(ctx))),
        streams,
        Arc::new(substrate.sources.clone()),
        registry,
        ControllerSettings {
            workers: cfg.workers(),
            resync_period: cfg.resync_period(),
        },
    ))
}

/// Create the sources listed in a JSON array file. Existing ones are kept.
pub async fn seed_from_file(substrate: &Substrate, path: &str) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;
    let sources: Vec<Source> = serde_json::from_str(&raw)?;
    let mut created = 0;
    for src in sources {
        let key = src.metadata.key();
        match substrate.sources.create(src).await {
            Ok(_) => created += 1,
            Err(e) if e.is_already_exists() => warn!(%key, "seed: source already exists"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

/// Spawn the readiness simulators for both child kinds.
pub fn spawn_simulators(substrate: &Substrate, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    let topics = Arc::new(substrate.topics.clone());
    let subs = Arc::new(substrate.pull_subscriptions.clone());
    tokio::spawn(async move {
        tokio::join!(
            simulate_ready::<Topic>(topics, token.clone()),
            simulate_ready::<PullSubscription>(subs, token),
        );
    })
}

/// Start the controller, event sink and (in dev) the readiness simulator,
/// and run until Ctrl-C.
pub async fn run_all(cfg: ControllerConfig) -> anyhow::Result<()> {
    let substrate = Substrate::in_memory();
    let token = CancellationToken::new();
    let (recorder, events) = EventRecorder::new();
    let controller = build_controller(&cfg, &substrate, recorder, token.clone()).await?;

    if let Some(path) = cfg.dev.seed_file.as_deref() {
        let count = seed_from_file(&substrate, path).await?;
        info!(count, path, "seeded sources");
    }

    let sims = if cfg.simulate_ready() {
        info!("readiness simulator enabled");
        spawn_simulators(&substrate, token.clone())
    } else {
        tokio::spawn(async {})
    };
    let sink = tokio::spawn(run_event_sink(events, token.clone()));
    let ctrl = tokio::spawn(controller.run(token.clone()));

    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl-C; shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C; shutting down"),
        }
        shutdown.cancel();
    });

    let (c_res, _, _) = try_join!(ctrl, sink, sims)?;
    c_res
}
