use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evsrc_models::*;
use evsrc_store::{ResourceBackend, ResourceCache, ResourceStore, StoreError, StoreResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::children::{
    ChildObject, child_meta, current_ready, desired_pull_subscription, desired_topic,
    is_controlled_by,
};
use super::descriptor::{DescriptorRegistry, SourceDescriptor, child_condition};
use super::events::{EventRecorder, REASON_FINALIZED, REASON_RECONCILED};
use super::provisioner::Provisioners;
use super::resolver::SinkResolver;
use super::status::StatusDraft;
use super::{Outcome, Reconcile, ReconcileError};

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    /// Bound on every store, resolver and provisioner call.
    pub call_timeout: Duration,
    /// Compare-and-swap attempts per metadata or status write.
    pub conflict_retries: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            conflict_retries: 5,
        }
    }
}

/// Collaborators a reconciliation reads from and writes to.
pub struct ReconcileContext {
    pub sources: Arc<dyn ResourceBackend<Source>>,
    pub topics: Arc<dyn ResourceBackend<Topic>>,
    pub pull_subscriptions: Arc<dyn ResourceBackend<PullSubscription>>,
    pub resolver: Arc<dyn SinkResolver>,
    pub provisioners: Provisioners,
    pub registry: Arc<DescriptorRegistry>,
    pub recorder: EventRecorder,
    pub settings: ReconcileSettings,
    /// Cancelled on shutdown; aborts in-flight external calls.
    pub token: CancellationToken,
}

impl ReconcileContext {
    /// Run one external call under the timeout, giving up on shutdown.
    /// A timeout surfaces as `StoreError::Timeout`.
    async fn call<T, F>(&self, op: &str, fut: F) -> Result<StoreResult<T>, ReconcileError>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        let limit = self.settings.call_timeout;
        tokio::select! {
            _ = self.token.cancelled() => Err(ReconcileError::Cancelled),
            res = tokio::time::timeout(limit, fut) => Ok(res.unwrap_or_else(|_| {
                Err(StoreError::Timeout(format!("{op} did not finish within {limit:?}")))
            })),
        }
    }
}

/// Why evaluation of a source stopped early.
enum Halt {
    /// Unsatisfiable spec. Recorded as a False condition, never retried.
    Terminal { reason: &'static str, message: String },
    Failed(ReconcileError),
}

impl From<ReconcileError> for Halt {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Permanent { reason, message } => Halt::Terminal { reason, message },
            e => Halt::Failed(e),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StatusWrite {
    Unchanged,
    Written,
    /// The spec changed underneath; the computed status is already stale.
    Superseded,
}

struct ChildView {
    ready: Option<Condition>,
    resource_id: Option<String>,
}

impl ChildView {
    fn of<C: ChildObject>(child: &C) -> Self {
        Self {
            ready: current_ready(child).cloned(),
            resource_id: child.status().resource_id.clone(),
        }
    }
}

/// Converges one source toward its declared state.
pub struct SourceReconciler {
    ctx: Arc<ReconcileContext>,
}

impl SourceReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }

    fn report(&self, key: &ObjectKey, e: &ReconcileError) {
        if !matches!(e, ReconcileError::Cancelled) {
            self.ctx.recorder.warning(key, e.reason(), e.message());
        }
    }

    async fn finalize(&self, src: &Source, desc: &SourceDescriptor) -> Result<Outcome, ReconcileError> {
        let key = src.key();
        if !src.metadata.has_finalizer(desc.finalizer) {
            debug!("deletion in progress without our finalizer; nothing to clean up");
            return Ok(Outcome::done());
        }
        info!("finalizing");
        if let Err(e) = self.release_all(src, desc).await {
            warn!(error = %e, "cleanup failed; keeping finalizer");
            self.report(&key, &e);
            return Err(e);
        }

        let removed = self
            .update_with_retry(
                &*self.ctx.sources,
                src.clone(),
                "FinalizerUpdateFailed",
                |s: &mut Source| s.metadata.remove_finalizer(desc.finalizer),
            )
            .await;
        match removed {
            Ok(_) => {
                info!("finalizer removed");
                self.ctx.recorder.normal(
                    &key,
                    &format!("{}{}", src.kind(), REASON_FINALIZED),
                    "released owned resources",
                );
                Ok(Outcome::done())
            }
            Err(e) => {
                self.report(&key, &e);
                Err(e)
            }
        }
    }

    /// Release the external resource, then delete children in reverse
    /// creation order.
    async fn release_all(&self, src: &Source, desc: &SourceDescriptor) -> Result<(), ReconcileError> {
        if let Some(kind) = desc.provisioner {
            match self.ctx.provisioners.get(kind) {
                Some(p) => self
                    .ctx
                    .call("release", p.release(src))
                    .await?
                    .map_err(|e| ReconcileError::from_store("ReleaseFailed", e))?,
                None => debug!(?kind, "no provisioner configured; nothing to release"),
            }
        }
        for kind in desc.managed.iter().rev() {
            match kind {
                ChildKind::Topic => self.delete_child::<Topic, _>(&*self.ctx.topics, src).await?,
                ChildKind::PullSubscription => {
                    self.delete_child::<PullSubscription, _>(&*self.ctx.pull_subscriptions, src)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn delete_child<C, B>(&self, store: &B, src: &Source) -> Result<(), ReconcileError>
    where
        C: ChildObject,
        B: ResourceStore<C> + ?Sized,
    {
        let key = src.key();
        let kind = C::KIND;
        let child = match self.ctx.call("get", store.get(&key)).await? {
            Ok(c) => c,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(ReconcileError::from_store("DeleteFailed", e)),
        };
        if !is_controlled_by(child.meta(), src) {
            debug!(%kind, "child not controlled by this source; leaving it");
            return Ok(());
        }
        match self.ctx.call("delete", store.delete(&key)).await? {
            Ok(()) => {
                info!(%kind, "deleted child");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ReconcileError::from_store("DeleteFailed", e)),
        }
    }

    async fn converge(&self, cached: &Source, desc: &SourceDescriptor) -> Result<Outcome, ReconcileError> {
        let key = cached.key();
        // The finalizer goes on before anything else is created.
        let src = if cached.metadata.has_finalizer(desc.finalizer) {
            cached.clone()
        } else {
            info!("adding finalizer");
            let added = self
                .update_with_retry(
                    &*self.ctx.sources,
                    cached.clone(),
                    "FinalizerUpdateFailed",
                    |s: &mut Source| s.metadata.add_finalizer(desc.finalizer),
                )
                .await;
            match added {
                Ok(Some(s)) => s,
                Ok(None) => {
                    debug!("source vanished while adding finalizer");
                    return Ok(Outcome::done());
                }
                Err(e) => {
                    self.report(&key, &e);
                    return Err(e);
                }
            }
        };
        if src.metadata.is_deleting() {
            return Ok(Outcome::requeue());
        }

        let mut draft = StatusDraft::new(desc.conditions, &src.status);
        let halt = self.evaluate(&src, desc, &mut draft).await.err();
        match &halt {
            Some(Halt::Failed(ReconcileError::Cancelled)) => return Err(ReconcileError::Cancelled),
            // A transient failure has not seen every condition of this generation.
            Some(Halt::Failed(_)) => {}
            _ => draft.status.observed_generation = src.metadata.generation,
        }
        let ready = draft.is_ready();
        let write = self.write_status(&src, draft).await;

        match (halt, write) {
            (None, Ok(write)) => {
                info!(ready, ?write, "reconciled");
                self.ctx.recorder.normal(
                    &key,
                    &format!("{}{}", src.kind(), REASON_RECONCILED),
                    if ready { "source is ready" } else { "source is not ready yet" },
                );
                Ok(Outcome {
                    requeue: write == StatusWrite::Superseded,
                })
            }
            (Some(Halt::Terminal { reason, message }), Ok(write)) => {
                warn!(reason, %message, "spec cannot be satisfied");
                self.ctx.recorder.warning(&key, reason, message);
                Ok(Outcome {
                    requeue: write == StatusWrite::Superseded,
                })
            }
            (Some(Halt::Failed(e)), write) => {
                if let Err(we) = write {
                    warn!(error = %we, "could not record failure in status");
                }
                self.report(&key, &e);
                Err(e)
            }
            (_, Err(e)) => {
                self.report(&key, &e);
                Err(e)
            }
        }
    }

    /// Recompute every condition of `desc` into `draft`, creating or
    /// patching children on the way.
    async fn evaluate(&self, src: &Source, desc: &SourceDescriptor, draft: &mut StatusDraft) -> Result<(), Halt> {
        if let Some(sa) = &src.spec.service_account_name {
            if let Err(e) = validate_service_account_name(sa) {
                return Err(mark_terminal(draft, IDENTITY_VALIDATED, "InvalidServiceAccount", e.to_string()));
            }
        }
        draft.conditions().mark_true(IDENTITY_VALIDATED);

        if let Err(e) = validate_topic_id(&src.spec.topic) {
            let cond = if desc.manages(ChildKind::Topic) {
                TOPIC_READY
            } else {
                PULL_SUBSCRIPTION_READY
            };
            return Err(mark_terminal(draft, cond, "InvalidTopic", e.to_string()));
        }
        draft.status.project_id = src.spec.project.clone();
        draft.status.topic_id = Some(src.spec.topic.clone());

        for &kind in desc.managed {
            let cond = child_condition(kind);
            let observed = match kind {
                ChildKind::Topic => self
                    .reconcile_child::<Topic, _>(&*self.ctx.topics, src, desired_topic(src))
                    .await
                    .map(|t| ChildView::of(&t)),
                ChildKind::PullSubscription => self
                    .reconcile_child::<PullSubscription, _>(
                        &*self.ctx.pull_subscriptions,
                        src,
                        desired_pull_subscription(src, desc),
                    )
                    .await
                    .map(|s| ChildView::of(&s)),
            };
            let view = match observed {
                Ok(view) => view,
                Err(halt) => return Err(mark_halt(draft, cond, halt)),
            };
            if kind == ChildKind::PullSubscription {
                draft.status.subscription_id = view.resource_id.clone();
            }
            let not_ready = format!("{kind}NotReady");
            match &view.ready {
                Some(ready) => draft.conditions().propagate(cond, ready, &not_ready),
                None => draft.conditions().mark_unknown(
                    cond,
                    &not_ready,
                    format!("{kind} has not reported readiness for its current spec"),
                ),
            }
        }

        match self.resolve_sink(src).await {
            Ok(uri) => {
                draft.status.sink_uri = Some(uri);
                draft.conditions().mark_true(SINK_PROVIDED);
            }
            Err(halt) => {
                if matches!(halt, Halt::Terminal { .. }) {
                    draft.status.sink_uri = None;
                }
                return Err(mark_halt(draft, SINK_PROVIDED, halt));
            }
        }

        if let Some(kind) = desc.provisioner {
            let topic_ready = get_condition(&draft.status.conditions, TOPIC_READY).is_some_and(Condition::is_true);
            if !topic_ready {
                draft
                    .conditions()
                    .mark_unknown(EXTERNAL_READY, "TopicNotReady", "waiting for the topic to become ready");
                return Ok(());
            }
            let Some(p) = self.ctx.provisioners.get(kind) else {
                return Err(mark_terminal(
                    draft,
                    EXTERNAL_READY,
                    "ProvisionerMissing",
                    format!("no provisioner configured for {kind:?}"),
                ));
            };
            match self.ctx.call("ensure", p.ensure(src, &src.spec.topic)).await? {
                Ok(id) => {
                    draft.status.external_id = Some(id);
                    draft.conditions().mark_true(EXTERNAL_READY);
                }
                Err(StoreError::Invalid(message)) => {
                    return Err(mark_terminal(draft, EXTERNAL_READY, "InvalidExternalConfig", message));
                }
                Err(e) => {
                    let halt = ReconcileError::from_store("ExternalFailed", e).into();
                    return Err(mark_halt(draft, EXTERNAL_READY, halt));
                }
            }
        }
        Ok(())
    }

    /// Create the child when absent, patch its spec when it drifted, and
    /// return what the store holds afterwards.
    async fn reconcile_child<C, B>(&self, store: &B, src: &Source, desired: C::Spec) -> Result<C, Halt>
    where
        C: ChildObject,
        B: ResourceCache<C> + ResourceStore<C> + ?Sized,
    {
        let key = src.key();
        let kind = C::KIND;
        let existing = match store.lookup(&key).await {
            Some(c) => (*c).clone(),
            None => {
                let child = C::build(child_meta(src), desired.clone());
                match self.ctx.call("create", store.create(child)).await? {
                    Ok(created) => {
                        info!(%kind, "created child");
                        return Ok(created);
                    }
                    Err(e) if e.is_already_exists() => {
                        debug!(%kind, "child already exists; re-reading");
                        self.ctx
                            .call("get", store.get(&key))
                            .await?
                            .map_err(|e| {
                                // gone again between the two calls
                                if e.is_not_found() {
                                    ReconcileError::transient("GetFailed", e)
                                } else {
                                    ReconcileError::from_store("GetFailed", e)
                                }
                            })?
                    }
                    Err(e) => return Err(ReconcileError::from_store("CreateFailed", e).into()),
                }
            }
        };

        if !is_controlled_by(existing.meta(), src) {
            return Err(Halt::Terminal {
                reason: "NotOwned",
                message: format!("{kind} {key} is not controlled by {} {}", src.kind(), src.metadata.name),
            });
        }
        if existing.spec() == &desired {
            return Ok(existing);
        }

        info!(%kind, "child spec drifted; patching");
        let patched = self
            .update_with_retry(store, existing, "UpdateFailed", |c: &mut C| {
                if c.spec() == &desired {
                    return false;
                }
                *c.spec_mut() = desired.clone();
                true
            })
            .await?;
        patched.ok_or_else(|| {
            ReconcileError::transient("UpdateFailed", format!("{kind} {key} disappeared during update")).into()
        })
    }

    async fn resolve_sink(&self, src: &Source) -> Result<String, Halt> {
        let sink = &src.spec.sink;
        let Some(reference) = &sink.reference else {
            let Some(uri) = &sink.uri else {
                return Err(Halt::Terminal {
                    reason: "SinkMissing",
                    message: "sink must set either uri or ref".into(),
                });
            };
            validate_sink_uri(uri).map_err(|e| Halt::Terminal {
                reason: "InvalidSink",
                message: e.to_string(),
            })?;
            return Ok(uri.clone());
        };

        let namespace = if reference.namespace.is_empty() {
            &src.metadata.namespace
        } else {
            &reference.namespace
        };
        let base = match self.ctx.call("resolve", self.ctx.resolver.resolve(namespace, reference)).await? {
            Ok(base) => base,
            // The referenced object may simply not exist yet.
            Err(e) if e.is_not_found() || e.is_transient() => {
                return Err(ReconcileError::transient("SinkNotFound", e).into());
            }
            Err(e) => {
                return Err(Halt::Terminal {
                    reason: "InvalidSink",
                    message: e.to_string(),
                });
            }
        };
        // With a ref, uri is a path relative to the resolved address.
        let uri = match sink.uri.as_deref() {
            Some(path) if !path.is_empty() => {
                format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
            }
            _ => base,
        };
        validate_sink_uri(&uri).map_err(|e| Halt::Terminal {
            reason: "InvalidSink",
            message: e.to_string(),
        })?;
        Ok(uri)
    }

    async fn write_status(&self, src: &Source, draft: StatusDraft) -> Result<StatusWrite, ReconcileError> {
        if !draft.differs_from(&src.status) {
            debug!("status unchanged; skipping write");
            return Ok(StatusWrite::Unchanged);
        }
        let status = draft.into_status();
        let key = src.key();
        let generation = src.metadata.generation;
        let mut expected = src.metadata.resource_version;
        for attempt in 0..self.ctx.settings.conflict_retries.max(1) {
            let written = self
                .ctx
                .call("update_status", self.ctx.sources.update_status(&key, expected, status.clone()))
                .await?;
            match written {
                Ok(_) => {
                    debug!(attempt, "status written");
                    return Ok(StatusWrite::Written);
                }
                Err(e) if e.is_conflict() => {
                    let fresh = match self.ctx.call("get", self.ctx.sources.get(&key)).await? {
                        Ok(fresh) => fresh,
                        Err(e) if e.is_not_found() => return Ok(StatusWrite::Unchanged),
                        Err(e) => return Err(ReconcileError::from_store("StatusUpdateFailed", e)),
                    };
                    if fresh.metadata.generation != generation {
                        info!(
                            from = generation,
                            to = fresh.metadata.generation,
                            "spec changed during reconcile; dropping stale status"
                        );
                        return Ok(StatusWrite::Superseded);
                    }
                    if fresh.status == status {
                        return Ok(StatusWrite::Unchanged);
                    }
                    debug!(attempt, "status conflict; retrying from fresh read");
                    expected = fresh.metadata.resource_version;
                }
                Err(e) if e.is_not_found() => return Ok(StatusWrite::Unchanged),
                Err(e) => return Err(ReconcileError::from_store("StatusUpdateFailed", e)),
            }
        }
        Err(ReconcileError::Conflict(key.to_string()))
    }

    /// Apply `mutate` and write, re-reading and re-applying on conflict.
    /// `Ok(None)` when the object is gone.
    async fn update_with_retry<R, B, F>(
        &self,
        store: &B,
        mut current: R,
        failure_reason: &'static str,
        mutate: F,
    ) -> Result<Option<R>, ReconcileError>
    where
        R: Resource,
        B: ResourceStore<R> + ?Sized,
        F: Fn(&mut R) -> bool + Send + Sync,
    {
        let key = current.key();
        for _ in 0..self.ctx.settings.conflict_retries.max(1) {
            let mut next = current.clone();
            if !mutate(&mut next) {
                return Ok(Some(current));
            }
            match self.ctx.call("update", store.update(next)).await? {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_conflict() => {
                    debug!(%key, "update conflict; re-reading");
                    match self.ctx.call("get", store.get(&key)).await? {
                        Ok(fresh) => current = fresh,
                        Err(e) if e.is_not_found() => return Ok(None),
                        Err(e) => return Err(ReconcileError::from_store(failure_reason, e)),
                    }
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(ReconcileError::from_store(failure_reason, e)),
            }
        }
        Err(ReconcileError::Conflict(key.to_string()))
    }
}

fn mark_terminal(draft: &mut StatusDraft, cond: &str, reason: &'static str, message: String) -> Halt {
    draft.conditions().mark_false(cond, reason, message.clone());
    Halt::Terminal { reason, message }
}

/// Record `halt` on `cond`: False for terminal, Unknown for transient.
fn mark_halt(draft: &mut StatusDraft, cond: &str, halt: Halt) -> Halt {
    match halt {
        Halt::Terminal { reason, message } => mark_terminal(draft, cond, reason, message),
        Halt::Failed(e) => {
            if !matches!(e, ReconcileError::Cancelled) {
                draft.conditions().mark_unknown(cond, e.reason(), e.message());
            }
            Halt::Failed(e)
        }
    }
}

#[async_trait]
impl Reconcile for SourceReconciler {
    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> Result<Outcome, ReconcileError> {
        let key: ObjectKey = key.parse()?;
        let Some(src) = self.ctx.sources.lookup(&key).await else {
            debug!("source not found; treating as deleted");
            return Ok(Outcome::done());
        };
        let Some(desc) = self.ctx.registry.get(src.kind()) else {
            debug!(kind = %src.kind(), "kind not owned by this controller");
            return Ok(Outcome::done());
        };
        if src.metadata.is_deleting() {
            self.finalize(&src, desc).await
        } else {
            self.converge(&src, desc).await
        }
    }
}
