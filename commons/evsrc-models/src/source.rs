use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::condition::Condition;
use crate::meta::{HasStatus, ObjectMeta, OwnerReference, Resource, TypeMeta};

pub const SOURCES_API_VERSION: &str = "events.cloud.google.com/v1";

pub const CLOUD_PUBSUB_SOURCE: &str = "CloudPubSubSource";
pub const CLOUD_AUDIT_LOGS_SOURCE: &str = "CloudAuditLogsSource";
pub const CLOUD_STORAGE_SOURCE: &str = "CloudStorageSource";
pub const CLOUD_SCHEDULER_SOURCE: &str = "CloudSchedulerSource";

/// Reference to an addressable object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    pub api_version: String,
    pub kind: String,
    /// Defaults to the referring object's namespace when empty.
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// Where events are delivered: either a literal URI or a reference that is
/// resolved to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<KReference>,
}

impl Destination {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            reference: None,
        }
    }

    pub fn reference(reference: KReference) -> Self {
        Self {
            uri: None,
            reference: Some(reference),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uri.is_none() && self.reference.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CloudEventOverrides {
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Pub/Sub topic ID events flow through.
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub sink: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ce_overrides: Option<CloudEventOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Identifier of the provider-side resource (audit log sink, bucket
    /// notification, scheduler job) when the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// A cloud event source. One type serves every source kind; `type_meta.kind`
/// tells them apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    pub spec: SourceSpec,
    #[serde(default)]
    pub status: SourceStatus,
}

impl Source {
    pub fn new(
        kind: &str,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: SourceSpec,
    ) -> Self {
        Self {
            type_meta: TypeMeta::new(SOURCES_API_VERSION, kind),
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: SourceStatus::default(),
        }
    }

    /// Owner reference children carry back to this source.
    pub fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.type_meta.api_version.clone(),
            kind: self.type_meta.kind.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }
}

impl Resource for Source {
    fn type_meta(&self) -> &TypeMeta {
        &self.type_meta
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }
}

impl HasStatus for Source {
    type Status = SourceStatus;

    fn status(&self) -> &SourceStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut SourceStatus {
        &mut self.status
    }
}
