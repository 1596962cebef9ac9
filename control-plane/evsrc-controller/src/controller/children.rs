use std::collections::BTreeMap;
use std::fmt::Debug;

use evsrc_models::*;

use super::descriptor::SourceDescriptor;

pub const SOURCE_NAME_LABEL: &str = "events.cloud.google.com/source-name";
pub const SOURCE_KIND_LABEL: &str = "events.cloud.google.com/source-kind";

/// Common shape of the child kinds a source owns.
pub trait ChildObject: HasStatus<Status = ChildStatus> {
    const KIND: ChildKind;
    type Spec: Clone + Debug + PartialEq + Send + Sync;

    fn build(metadata: ObjectMeta, spec: Self::Spec) -> Self;
    fn spec(&self) -> &Self::Spec;
    fn spec_mut(&mut self) -> &mut Self::Spec;
}

impl ChildObject for Topic {
    const KIND: ChildKind = ChildKind::Topic;
    type Spec = TopicSpec;

    fn build(metadata: ObjectMeta, spec: TopicSpec) -> Self {
        Topic::new(metadata, spec)
    }

    fn spec(&self) -> &TopicSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut TopicSpec {
        &mut self.spec
    }
}

impl ChildObject for PullSubscription {
    const KIND: ChildKind = ChildKind::PullSubscription;
    type Spec = PullSubscriptionSpec;

    fn build(metadata: ObjectMeta, spec: PullSubscriptionSpec) -> Self {
        PullSubscription::new(metadata, spec)
    }

    fn spec(&self) -> &PullSubscriptionSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut PullSubscriptionSpec {
        &mut self.spec
    }
}

/// Children share the source's namespace and name and point back at it.
pub fn child_meta(src: &Source) -> ObjectMeta {
    let mut meta = ObjectMeta::new(&src.metadata.namespace, &src.metadata.name);
    meta.owner_references = vec![src.controller_owner_ref()];
    meta.labels = BTreeMap::from([
        (SOURCE_NAME_LABEL.to_string(), src.metadata.name.clone()),
        (SOURCE_KIND_LABEL.to_string(), src.type_meta.kind.to_ascii_lowercase()),
    ]);
    meta
}

pub fn desired_topic(src: &Source) -> TopicSpec {
    TopicSpec {
        topic_id: src.spec.topic.clone(),
        project: src.spec.project.clone(),
        service_account_name: src.spec.service_account_name.clone(),
    }
}

pub fn desired_pull_subscription(src: &Source, desc: &SourceDescriptor) -> PullSubscriptionSpec {
    PullSubscriptionSpec {
        topic_id: src.spec.topic.clone(),
        project: src.spec.project.clone(),
        sink: src.spec.sink.clone(),
        service_account_name: src.spec.service_account_name.clone(),
        ce_overrides: src.spec.ce_overrides.clone(),
        adapter_type: Some(desc.adapter_type.to_string()),
    }
}

/// Whether `meta` is controlled by `src` (same kind and uid).
pub fn is_controlled_by(meta: &ObjectMeta, src: &Source) -> bool {
    meta.controller_ref()
        .is_some_and(|o| o.uid == src.metadata.uid && o.kind == src.type_meta.kind)
}

/// The child's Ready condition, but only once it reflects the current
/// child spec.
pub fn current_ready<C: ChildObject>(child: &C) -> Option<&Condition> {
    let status = child.status();
    if status.observed_generation < child.meta().generation {
        return None;
    }
    status.ready()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::descriptors_builtin::descriptor_auditlogs;

    fn source() -> Source {
        let mut s = Source::new(
            CLOUD_AUDIT_LOGS_SOURCE,
            "default",
            "a",
            SourceSpec {
                topic: "t1".into(),
                sink: Destination::uri("http://sink.example/"),
                ..Default::default()
            },
        );
        s.metadata.uid = "u1".into();
        s
    }

    #[test]
    fn desired_children_are_deterministic() {
        let src = source();
        let d = descriptor_auditlogs();
        assert_eq!(desired_topic(&src), desired_topic(&src.clone()));
        let sub = desired_pull_subscription(&src, &d);
        assert_eq!(sub.topic_id, "t1");
        assert_eq!(sub.adapter_type.as_deref(), Some("google.events.cloud.audit.v1"));
        assert_eq!(sub, desired_pull_subscription(&src, &d));
    }

    #[test]
    fn child_meta_points_back_at_the_source() {
        let src = source();
        let meta = child_meta(&src);
        assert_eq!(meta.key(), src.key());
        assert!(is_controlled_by(&meta, &src));

        let mut other = src.clone();
        other.metadata.uid = "u2".into();
        assert!(!is_controlled_by(&meta, &other));
        assert!(!is_controlled_by(&ObjectMeta::new("default", "a"), &src));
    }

    #[test]
    fn stale_ready_is_ignored() {
        let mut topic = Topic::new(child_meta(&source()), desired_topic(&source()));
        topic.metadata.generation = 2;
        topic.status.observed_generation = 1;
        topic.status.conditions.push(Condition {
            type_: READY.into(),
            status: ConditionStatus::True,
            reason: None,
            message: None,
            last_transition_time: None,
        });
        assert!(current_ready(&topic).is_none());
        topic.status.observed_generation = 2;
        assert!(current_ready(&topic).unwrap().is_true());
    }
}
