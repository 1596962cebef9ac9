pub mod children;
pub mod correlator;
pub mod descriptor;
pub mod descriptors_builtin;
pub mod events;
pub mod provisioner;
pub mod reconcile;
pub mod resolver;
pub mod status;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evsrc_models::{KeyError, Resource, Source};
use evsrc_store::{ResourceCache, StoreError};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::workqueue::WorkQueue;
use correlator::{EventCorrelator, WatchStreams};
use descriptor::DescriptorRegistry;

pub use reconcile::{ReconcileContext, ReconcileSettings, SourceReconciler};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("{reason}: {message}")]
    Transient { reason: String, message: String },

    /// Rejected by a collaborator in a way retrying cannot fix.
    #[error("{reason}: {message}")]
    Permanent {
        reason: &'static str,
        message: String,
    },

    #[error("conflict writing {0}: retries exhausted")]
    Conflict(String),

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    pub fn transient(reason: &str, message: impl ToString) -> Self {
        ReconcileError::Transient {
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }

    /// Transient for errors worth retrying with backoff, permanent
    /// otherwise.
    pub fn from_store(reason: &'static str, e: StoreError) -> Self {
        if e.is_transient() {
            Self::transient(reason, e)
        } else {
            ReconcileError::Permanent {
                reason,
                message: e.to_string(),
            }
        }
    }

    /// Short machine-readable reason, used for conditions and events.
    pub fn reason(&self) -> &str {
        match self {
            ReconcileError::InvalidKey(_) => "InvalidKey",
            ReconcileError::Transient { reason, .. } => reason,
            ReconcileError::Permanent { reason, .. } => reason,
            ReconcileError::Conflict(_) => "UpdateConflict",
            ReconcileError::Cancelled => "Cancelled",
            ReconcileError::Panicked(_) => "Panicked",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ReconcileError::Transient { message, .. }
            | ReconcileError::Permanent { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Successful reconciliation result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Reconcile again soon without counting a failure.
    pub requeue: bool,
}

impl Outcome {
    pub fn done() -> Self {
        Self { requeue: false }
    }

    pub fn requeue() -> Self {
        Self { requeue: true }
    }
}

/// Level-triggered convergence for one key.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, key: &str) -> Result<Outcome, ReconcileError>;
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub workers: usize,
    pub resync_period: Duration,
}

/// Owns the queue, the worker pool, the resync timer and the correlator.
pub struct Controller<R> {
    queue: WorkQueue<String>,
    reconciler: Arc<R>,
    correlator: EventCorrelator,
    streams: WatchStreams,
    sources: Arc<dyn ResourceCache<Source>>,
    registry: Arc<DescriptorRegistry>,
    settings: ControllerSettings,
}

impl<R: Reconcile> Controller<R> {
    pub fn new(
        queue: WorkQueue<String>,
        reconciler: Arc<R>,
        streams: WatchStreams,
        sources: Arc<dyn ResourceCache<Source>>,
        registry: Arc<DescriptorRegistry>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            queue,
            correlator: EventCorrelator::new(registry.clone()),
            reconciler,
            streams,
            sources,
            registry,
            settings,
        }
    }

    pub fn queue(&self) -> WorkQueue<String> {
        self.queue.clone()
    }

    /// Run until `token` is cancelled, then shut the queue down and wait for
    /// every worker to finish its current item.
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let Controller {
            queue,
            reconciler,
            correlator,
            streams,
            sources,
            registry,
            settings,
        } = self;
        info!(workers = settings.workers, resync = ?settings.resync_period, kinds = ?registry.kinds(), "controller: starting");

        let correlate = tokio::spawn(correlator.run(streams, queue.clone(), token.clone()));
        let resync = tokio::spawn(resync_loop(
            sources,
            registry,
            queue.clone(),
            settings.resync_period,
            token.clone(),
        ));
        let workers: Vec<_> = (0..settings.workers.max(1))
            .map(|id| tokio::spawn(worker(id, queue.clone(), reconciler.clone())))
            .collect();

        token.cancelled().await;
        info!("controller: shutting down");
        queue.shut_down().await;

        let mut first_err: Option<anyhow::Error> = None;
        let background = [("resync", resync), ("correlator", correlate)];
        let tasks = join_all(workers)
            .await
            .into_iter()
            .map(|res| ("worker", res))
            .chain(join_all(background.map(|(name, h)| async move { (name, h.await) })).await);
        for (task, res) in tasks {
            if let Err(e) = res {
                error!(task, error = %e, "controller: task failed");
                first_err.get_or_insert(e.into());
            }
        }
        info!("controller: stopped");
        first_err.map_or(Ok(()), Err)
    }
}

async fn worker<R: Reconcile>(id: usize, queue: WorkQueue<String>, reconciler: Arc<R>) {
    debug!(worker = id, "worker: started");
    while let Some(key) = queue.get().await {
        // A panic is contained to this item so `done` always runs.
        let result = AssertUnwindSafe(reconciler.reconcile(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ReconcileError::Panicked(panic_message(&*panic))));
        match result {
            Ok(outcome) if outcome.requeue => {
                debug!(worker = id, %key, "reconciled, requeue requested");
                queue.add(key.clone()).await;
            }
            Ok(_) => {
                debug!(worker = id, %key, "reconciled");
                queue.forget(&key).await;
            }
            Err(ReconcileError::InvalidKey(e)) => {
                error!(worker = id, %key, error = %e, "dropping unparseable key");
                queue.forget(&key).await;
            }
            Err(ReconcileError::Cancelled) => {
                debug!(worker = id, %key, "reconcile cancelled");
            }
            Err(e @ ReconcileError::Permanent { .. }) => {
                error!(worker = id, %key, error = %e, "reconcile failed permanently; not retrying");
                queue.forget(&key).await;
            }
            Err(e) => {
                let retries = queue.num_requeues(&key).await;
                warn!(worker = id, %key, retries, error = %e, "reconcile failed; backing off");
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
    debug!(worker = id, "worker: stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Enqueue every cached source of an owned kind, immediately and then every
/// `period`.
async fn resync_loop(
    sources: Arc<dyn ResourceCache<Source>>,
    registry: Arc<DescriptorRegistry>,
    queue: WorkQueue<String>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let mut count = 0usize;
        for src in sources.list().await {
            if registry.owns(src.kind()) {
                queue.add(src.key().to_string()).await;
                count += 1;
            }
        }
        debug!(count, "resync: enqueued cached sources");
    }
}
