use std::collections::HashMap;

use evsrc_models::{ChildKind, ConditionSet, PULL_SUBSCRIPTION_READY, TOPIC_READY};

use super::descriptors_builtin;

/// Provider-side resource some source kinds create on top of the topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProvisionerKind {
    AuditLogSink,
    StorageNotification,
    SchedulerJob,
}

impl ProvisionerKind {
    pub fn id_prefix(self) -> &'static str {
        match self {
            ProvisionerKind::AuditLogSink => "sink",
            ProvisionerKind::StorageNotification => "notification",
            ProvisionerKind::SchedulerJob => "job",
        }
    }
}

/// Per-kind reconciliation policy: which children exist, which conditions
/// make up readiness and what cleanup the finalizer guards.
#[derive(Clone, Debug)]
pub struct SourceDescriptor {
    pub kind: &'static str,
    pub plural: &'static str,
    pub managed: &'static [ChildKind],
    pub conditions: ConditionSet,
    pub provisioner: Option<ProvisionerKind>,
    pub adapter_type: &'static str,
    pub finalizer: &'static str,
}

impl SourceDescriptor {
    pub fn manages(&self, child: ChildKind) -> bool {
        self.managed.contains(&child)
    }
}

/// Condition a managed child's Ready is copied into.
pub fn child_condition(child: ChildKind) -> &'static str {
    match child {
        ChildKind::Topic => TOPIC_READY,
        ChildKind::PullSubscription => PULL_SUBSCRIPTION_READY,
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown source kind: {0}")]
pub struct UnknownKind(pub String);

/// The set of source kinds this controller owns.
#[derive(Clone, Debug)]
pub struct DescriptorRegistry {
    by_kind: HashMap<&'static str, SourceDescriptor>,
}

impl DescriptorRegistry {
    pub fn builtin() -> Self {
        let by_kind = descriptors_builtin::all()
            .into_iter()
            .map(|d| (d.kind, d))
            .collect();
        Self { by_kind }
    }

    /// Restrict the built-ins to `kinds`.
    pub fn only<S: AsRef<str>>(kinds: &[S]) -> Result<Self, UnknownKind> {
        let all = Self::builtin();
        let mut by_kind = HashMap::new();
        for kind in kinds {
            let d = all
                .get(kind.as_ref())
                .ok_or_else(|| UnknownKind(kind.as_ref().to_string()))?;
            by_kind.insert(d.kind, d.clone());
        }
        Ok(Self { by_kind })
    }

    pub fn get(&self, kind: &str) -> Option<&SourceDescriptor> {
        self.by_kind.get(kind)
    }

    pub fn owns(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.by_kind.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
