use std::time::Duration;

use evsrc_controller::controller::{Reconcile, ReconcileError, ReconcileSettings};
use evsrc_models::*;
use evsrc_store::{ResourceCache, ResourceStore, StoreError};

mod common;
use common::{Harness, audit_source, broker, condition};

const FINALIZER: &str = "cloudauditlogssources.events.cloud.google.com";

#[test_log::test(tokio::test)]
async fn child_create_timeout_is_transient() {
    let h = Harness::with_settings(ReconcileSettings {
        call_timeout: Duration::from_millis(50),
        conflict_retries: 5,
    });
    let key = h.create(audit_source("a", "t1")).await.key();
    h.topics.hang_creates(true);

    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Transient { .. }));
    assert_eq!(err.reason(), "CreateFailed");

    let after = h.source(&key).await;
    assert!(after.metadata.has_finalizer(FINALIZER));
    assert_eq!(after.status.observed_generation, 0);
    let topic_ready = condition(&after, TOPIC_READY);
    assert_eq!(topic_ready.status, ConditionStatus::Unknown);
    assert_eq!(topic_ready.reason.as_deref(), Some("CreateFailed"));
    assert!(h.topics.inner.is_empty().await);

    h.topics.hang_creates(false);
    h.reconcile(&key).await.unwrap();
    assert_eq!(h.source(&key).await.status.observed_generation, 1);
}

#[test_log::test(tokio::test)]
async fn create_race_adopts_the_existing_child() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.topics
        .fail_next_create(StoreError::AlreadyExists(key.to_string()));
    // the lost race left nothing behind, so the re-read fails and we retry
    let err = h.reconcile(&key).await.unwrap_err();
    assert_eq!(err.reason(), "GetFailed");
    h.reconcile(&key).await.unwrap();
    assert!(h.topics.inner.lookup(&key).await.is_some());
}

#[test_log::test(tokio::test)]
async fn status_conflicts_are_retried_from_a_fresh_read() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.sources.conflict_status_writes(2);

    let outcome = h.reconcile(&key).await.unwrap();
    assert!(!outcome.requeue);
    assert_eq!(h.source(&key).await.status.observed_generation, 1);
}

#[test_log::test(tokio::test)]
async fn persistent_conflicts_surface_as_an_error() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.sources.conflict_status_writes(100);

    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));
}

#[test_log::test(tokio::test)]
async fn status_for_a_superseded_generation_is_dropped() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.sources
        .edit_before_next_status(|s: &mut Source| s.spec.topic = "t2".into());

    let outcome = h.reconcile(&key).await.unwrap();
    assert!(outcome.requeue);
    let after = h.source(&key).await;
    assert_eq!(after.metadata.generation, 2);
    assert_eq!(after.status.observed_generation, 0);

    h.reconcile(&key).await.unwrap();
    assert_eq!(h.source(&key).await.status.observed_generation, 2);
    assert_eq!(h.topics.inner.get(&key).await.unwrap().spec.topic_id, "t2");
}

#[test_log::test(tokio::test)]
async fn invalid_service_account_is_terminal() {
    let h = Harness::new();
    let mut src = audit_source("a", "t1");
    src.spec.service_account_name = Some("Not_A_Label".into());
    let key = h.create(src).await.key();

    let outcome = h.reconcile(&key).await.unwrap();
    assert!(!outcome.requeue);
    let after = h.source(&key).await;
    let identity = condition(&after, IDENTITY_VALIDATED);
    assert!(identity.is_false());
    assert_eq!(identity.reason.as_deref(), Some("InvalidServiceAccount"));
    assert!(condition(&after, READY).is_false());
    assert_eq!(after.status.observed_generation, 1);
    assert!(h.topics.inner.is_empty().await);
    assert!(h.event_reasons().iter().any(|r| r == "InvalidServiceAccount"));
}

#[test_log::test(tokio::test)]
async fn invalid_topic_is_terminal() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "goog-reserved")).await.key();

    assert!(!h.reconcile(&key).await.unwrap().requeue);
    let after = h.source(&key).await;
    assert_eq!(condition(&after, TOPIC_READY).reason.as_deref(), Some("InvalidTopic"));
    assert!(condition(&after, READY).is_false());
    assert!(h.topics.inner.is_empty().await);
}

#[test_log::test(tokio::test)]
async fn child_owned_by_someone_else_is_not_adopted() {
    let h = Harness::new();
    let src = h.create(audit_source("a", "t1")).await;
    let key = src.key();
    let mut foreign = Topic::new(
        ObjectMeta::new("default", "a"),
        TopicSpec {
            topic_id: "other".into(),
            ..Default::default()
        },
    );
    foreign.metadata.owner_references = vec![OwnerReference {
        api_version: SOURCES_API_VERSION.into(),
        kind: CLOUD_AUDIT_LOGS_SOURCE.into(),
        name: "a".into(),
        uid: "previous-incarnation".into(),
        controller: true,
    }];
    h.topics.inner.create(foreign).await.unwrap();

    assert!(!h.reconcile(&key).await.unwrap().requeue);
    let after = h.source(&key).await;
    assert_eq!(condition(&after, TOPIC_READY).reason.as_deref(), Some("NotOwned"));
    assert!(condition(&after, READY).is_false());
    assert_eq!(h.topics.inner.get(&key).await.unwrap().spec.topic_id, "other");
}

#[test_log::test(tokio::test)]
async fn missing_sink_is_terminal() {
    let h = Harness::new();
    let mut src = audit_source("a", "t1");
    src.spec.sink = Destination::default();
    let key = h.create(src).await.key();

    assert!(!h.reconcile(&key).await.unwrap().requeue);
    let after = h.source(&key).await;
    let sink = condition(&after, SINK_PROVIDED);
    assert!(sink.is_false());
    assert_eq!(sink.reason.as_deref(), Some("SinkMissing"));
    assert!(after.status.sink_uri.is_none());
}

#[test_log::test(tokio::test)]
async fn unresolvable_sink_ref_is_retried_until_it_appears() {
    let h = Harness::new();
    let mut src = audit_source("a", "t1");
    src.spec.sink = Destination {
        uri: Some("/extra/path".into()),
        reference: Some(broker("default")),
    };
    let key = h.create(src).await.key();

    let err = h.reconcile(&key).await.unwrap_err();
    assert_eq!(err.reason(), "SinkNotFound");
    let after = h.source(&key).await;
    assert_eq!(condition(&after, SINK_PROVIDED).status, ConditionStatus::Unknown);
    assert_eq!(after.status.observed_generation, 0);

    h.resolver
        .register("default", &broker("default"), "http://broker-ingress.example/default/")
        .await;
    h.reconcile(&key).await.unwrap();
    let resolved = h.source(&key).await;
    assert!(condition(&resolved, SINK_PROVIDED).is_true());
    assert_eq!(
        resolved.status.sink_uri.as_deref(),
        Some("http://broker-ingress.example/default/extra/path")
    );
}

#[test_log::test(tokio::test)]
async fn service_refs_resolve_to_cluster_dns() {
    let h = Harness::new();
    let mut src = audit_source("a", "t1");
    src.spec.sink = Destination::reference(KReference {
        api_version: "v1".into(),
        kind: "Service".into(),
        namespace: String::new(),
        name: "display".into(),
    });
    let key = h.create(src).await.key();

    h.reconcile(&key).await.unwrap();
    assert_eq!(
        h.source(&key).await.status.sink_uri.as_deref(),
        Some("http://display.default.svc.cluster.local/")
    );
}

#[test_log::test(tokio::test)]
async fn malformed_keys_are_rejected() {
    let h = Harness::new();
    let err = h.reconciler.reconcile("no-namespace").await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidKey(_)));
}

#[test_log::test(tokio::test)]
async fn shutdown_cancels_in_flight_calls() {
    let h = Harness::with_settings(ReconcileSettings {
        call_timeout: Duration::from_secs(60),
        conflict_retries: 5,
    });
    let key = h.create(audit_source("a", "t1")).await.key();
    h.topics.hang_creates(true);
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cancelled));
    assert!(h.event_reasons().iter().all(|r| r != "Cancelled"));
}

#[test_log::test(tokio::test)]
async fn rejected_child_is_terminal_not_retried() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.topics
        .fail_next_create(StoreError::Invalid("topic id rejected by admission".into()));

    let outcome = h.reconcile(&key).await.unwrap();
    assert!(!outcome.requeue);
    let after = h.source(&key).await;
    let topic_ready = condition(&after, TOPIC_READY);
    assert!(topic_ready.is_false());
    assert_eq!(topic_ready.reason.as_deref(), Some("CreateFailed"));
    assert!(condition(&after, READY).is_false());
    assert_eq!(after.status.observed_generation, 1);
    assert!(h.event_reasons().iter().any(|r| r == "CreateFailed"));
}

#[test_log::test(tokio::test)]
async fn unavailable_store_stays_transient() {
    let h = Harness::new();
    let key = h.create(audit_source("a", "t1")).await.key();
    h.topics
        .fail_next_create(StoreError::Unavailable("connection reset".into()));

    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Transient { .. }));
    let after = h.source(&key).await;
    assert_eq!(condition(&after, TOPIC_READY).status, ConditionStatus::Unknown);
    assert_eq!(after.status.observed_generation, 0);
}
