use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::{Condition, READY, get_condition};
use crate::meta::{HasStatus, ObjectMeta, Resource, TypeMeta};
use crate::source::{CloudEventOverrides, Destination};

pub const CHILDREN_API_VERSION: &str = "internal.events.cloud.google.com/v1";

pub const TOPIC_KIND: &str = "Topic";
pub const PULL_SUBSCRIPTION_KIND: &str = "PullSubscription";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildKind {
    Topic,
    PullSubscription,
}

impl ChildKind {
    pub fn kind(self) -> &'static str {
        match self {
            ChildKind::Topic => TOPIC_KIND,
            ChildKind::PullSubscription => PULL_SUBSCRIPTION_KIND,
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Status reported by the controllers that own the provider-side resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChildStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Provider-assigned identifier (e.g. the subscription ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ChildStatus {
    pub fn ready(&self) -> Option<&Condition> {
        get_condition(&self.conditions, READY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    pub topic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    pub spec: TopicSpec,
    #[serde(default)]
    pub status: ChildStatus,
}

impl Topic {
    pub fn new(metadata: ObjectMeta, spec: TopicSpec) -> Self {
        Self {
            type_meta: TypeMeta::new(CHILDREN_API_VERSION, TOPIC_KIND),
            metadata,
            spec,
            status: ChildStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PullSubscriptionSpec {
    pub topic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub sink: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ce_overrides: Option<CloudEventOverrides>,
    /// Event payload converter selected by the owning source kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullSubscription {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    pub spec: PullSubscriptionSpec,
    #[serde(default)]
    pub status: ChildStatus,
}

impl PullSubscription {
    pub fn new(metadata: ObjectMeta, spec: PullSubscriptionSpec) -> Self {
        Self {
            type_meta: TypeMeta::new(CHILDREN_API_VERSION, PULL_SUBSCRIPTION_KIND),
            metadata,
            spec,
            status: ChildStatus::default(),
        }
    }
}

macro_rules! child_resource {
    ($ty:ty) => {
        impl Resource for $ty {
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

        impl HasStatus for $ty {
            type Status = ChildStatus;

            fn status(&self) -> &ChildStatus {
                &self.status
            }

            fn status_mut(&mut self) -> &mut ChildStatus {
                &mut self.status
            }
        }
    };
}

child_resource!(Topic);
child_resource!(PullSubscription);
