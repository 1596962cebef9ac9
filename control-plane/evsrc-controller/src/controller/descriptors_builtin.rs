use evsrc_models::*;

use super::descriptor::{ProvisionerKind, SourceDescriptor};

static SUBSCRIPTION_ONLY: &[ChildKind] = &[ChildKind::PullSubscription];
static TOPIC_AND_SUBSCRIPTION: &[ChildKind] = &[ChildKind::Topic, ChildKind::PullSubscription];

// The topic of a CloudPubSubSource belongs to the user.
static PUBSUB_CONDITIONS: ConditionSet =
    ConditionSet::new(READY, &[IDENTITY_VALIDATED, PULL_SUBSCRIPTION_READY, SINK_PROVIDED]);

static PROVISIONED_CONDITIONS: ConditionSet = ConditionSet::new(
    READY,
    &[
        IDENTITY_VALIDATED,
        TOPIC_READY,
        PULL_SUBSCRIPTION_READY,
        SINK_PROVIDED,
        EXTERNAL_READY,
    ],
);

pub fn descriptor_pubsub() -> SourceDescriptor {
    SourceDescriptor {
        kind: CLOUD_PUBSUB_SOURCE,
        plural: "cloudpubsubsources",
        managed: SUBSCRIPTION_ONLY,
        conditions: PUBSUB_CONDITIONS,
        provisioner: None,
        adapter_type: "google.events.cloud.pubsub.v1",
        finalizer: "cloudpubsubsources.events.cloud.google.com",
    }
}

pub fn descriptor_auditlogs() -> SourceDescriptor {
    SourceDescriptor {
        kind: CLOUD_AUDIT_LOGS_SOURCE,
        plural: "cloudauditlogssources",
        managed: TOPIC_AND_SUBSCRIPTION,
        conditions: PROVISIONED_CONDITIONS,
        provisioner: Some(ProvisionerKind::AuditLogSink),
        adapter_type: "google.events.cloud.audit.v1",
        finalizer: "cloudauditlogssources.events.cloud.google.com",
    }
}

pub fn descriptor_storage() -> SourceDescriptor {
    SourceDescriptor {
        kind: CLOUD_STORAGE_SOURCE,
        plural: "cloudstoragesources",
        managed: TOPIC_AND_SUBSCRIPTION,
        conditions: PROVISIONED_CONDITIONS,
        provisioner: Some(ProvisionerKind::StorageNotification),
        adapter_type: "google.events.cloud.storage.v1",
        finalizer: "cloudstoragesources.events.cloud.google.com",
    }
}

pub fn descriptor_scheduler() -> SourceDescriptor {
    SourceDescriptor {
        kind: CLOUD_SCHEDULER_SOURCE,
        plural: "cloudschedulersources",
        managed: TOPIC_AND_SUBSCRIPTION,
        conditions: PROVISIONED_CONDITIONS,
        provisioner: Some(ProvisionerKind::SchedulerJob),
        adapter_type: "google.events.cloud.scheduler.v1",
        finalizer: "cloudschedulersources.events.cloud.google.com",
    }
}

pub fn all() -> Vec<SourceDescriptor> {
    vec![
        descriptor_pubsub(),
        descriptor_auditlogs(),
        descriptor_storage(),
        descriptor_scheduler(),
    ]
}
