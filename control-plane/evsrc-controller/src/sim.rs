//! Dev-only stand-in for the topic and subscription controllers: marks every
//! child Ready for its current generation.

use std::sync::Arc;

use evsrc_models::{Condition, ConditionSet, READY, Resource};
use evsrc_store::{ResourceBackend, WatchEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::children::{ChildObject, current_ready};

static CHILD_READY: ConditionSet = ConditionSet::new(READY, &[]);

pub async fn simulate_ready<C: ChildObject>(backend: Arc<dyn ResourceBackend<C>>, token: CancellationToken) {
    let rx = backend.subscribe().await;
    for child in backend.list().await {
        mark_ready(&*backend, &child).await;
    }
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            ev = rx.recv_async() => match ev {
                Ok(ev) => ev,
                Err(_) => break,
            },
        };
        if let WatchEvent::Added(child) | WatchEvent::Modified(child) = event {
            mark_ready(&*backend, &child).await;
        }
    }
    let kind = C::KIND;
    debug!(%kind, "simulator: stopped");
}

async fn mark_ready<C: ChildObject>(backend: &dyn ResourceBackend<C>, child: &C) {
    if child.meta().is_deleting() || current_ready(child).is_some_and(Condition::is_true) {
        return;
    }
    let key = child.key();
    let kind = C::KIND;
    let mut status = child.status().clone();
    status.observed_generation = child.meta().generation;
    status
        .resource_id
        .get_or_insert_with(|| format!("{}-{}", kind.kind().to_ascii_lowercase(), child.meta().uid));
    CHILD_READY.manage(&mut status.conditions).mark_true(READY);

    match backend
        .update_status(&key, child.meta().resource_version, status)
        .await
    {
        Ok(_) => debug!(%kind, %key, "simulator: marked ready"),
        // a newer version is on its way through the watch
        Err(e) if e.is_conflict() || e.is_not_found() => {}
        Err(e) => warn!(%kind, %key, error = %e, "simulator: status update failed"),
    }
}
