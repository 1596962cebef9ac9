//! Maps change notifications to the keys of the sources that must be
//! reconciled again.

use std::collections::HashMap;
use std::sync::Arc;

use evsrc_models::*;
use evsrc_store::{ResourceCache, WatchEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::descriptor::DescriptorRegistry;
use crate::workqueue::WorkQueue;

/// Watch channels the correlator multiplexes.
pub struct WatchStreams {
    pub sources: flume::Receiver<WatchEvent<Source>>,
    pub topics: flume::Receiver<WatchEvent<Topic>>,
    pub pull_subscriptions: flume::Receiver<WatchEvent<PullSubscription>>,
}

impl WatchStreams {
    pub async fn subscribe(
        sources: &dyn ResourceCache<Source>,
        topics: &dyn ResourceCache<Topic>,
        pull_subscriptions: &dyn ResourceCache<PullSubscription>,
    ) -> Self {
        Self {
            sources: sources.subscribe().await,
            topics: topics.subscribe().await,
            pull_subscriptions: pull_subscriptions.subscribe().await,
        }
    }
}

pub struct EventCorrelator {
    registry: Arc<DescriptorRegistry>,
    /// Last owning source seen for each child.
    relations: HashMap<(ChildKind, ObjectKey), ObjectKey>,
}

impl EventCorrelator {
    pub fn new(registry: Arc<DescriptorRegistry>) -> Self {
        Self {
            registry,
            relations: HashMap::new(),
        }
    }

    /// A source maps to itself, but only for owned kinds.
    pub fn on_source(&self, event: &WatchEvent<Source>) -> Option<ObjectKey> {
        let src = event.object();
        self.registry.owns(src.kind()).then(|| src.key())
    }

    /// A child maps to its controlling source, plus the source it belonged
    /// to before when the owner reference moved or disappeared.
    pub fn on_child<C: Resource>(&mut self, kind: ChildKind, event: &WatchEvent<C>) -> Vec<ObjectKey> {
        let child = event.object();
        let rel = (kind, child.key());
        let current = self.owner_of(child.meta());
        let previous = match (&current, event.is_deleted()) {
            (_, true) => self.relations.remove(&rel),
            (Some(owner), false) => self.relations.insert(rel, owner.clone()),
            (None, false) => self.relations.remove(&rel),
        };

        let mut keys = Vec::with_capacity(2);
        keys.extend(current);
        if let Some(prev) = previous {
            if !keys.contains(&prev) {
                keys.push(prev);
            }
        }
        keys
    }

    fn owner_of(&self, meta: &ObjectMeta) -> Option<ObjectKey> {
        meta.owner_references
            .iter()
            .find(|o| {
                o.controller
                    && api_group(&o.api_version) == api_group(SOURCES_API_VERSION)
                    && self.registry.owns(&o.kind)
            })
            .map(|o| ObjectKey::new(&meta.namespace, &o.name))
    }

    pub fn tracked(&self) -> usize {
        self.relations.len()
    }

    /// Feed the queue from the watch channels until cancelled or every
    /// channel is closed.
    pub async fn run(mut self, streams: WatchStreams, queue: WorkQueue<String>, token: CancellationToken) {
        let WatchStreams {
            sources,
            topics,
            pull_subscriptions,
        } = streams;
        loop {
            let keys: Vec<ObjectKey> = tokio::select! {
                _ = token.cancelled() => break,
                ev = sources.recv_async() => match ev {
                    Ok(ev) => self.on_source(&ev).into_iter().collect(),
                    Err(_) => break,
                },
                ev = topics.recv_async() => match ev {
                    Ok(ev) => self.on_child(ChildKind::Topic, &ev),
                    Err(_) => break,
                },
                ev = pull_subscriptions.recv_async() => match ev {
                    Ok(ev) => self.on_child(ChildKind::PullSubscription, &ev),
                    Err(_) => break,
                },
            };
            for key in keys {
                trace!(%key, "correlator: enqueue");
                queue.add(key.to_string()).await;
            }
        }
        debug!(tracked = self.tracked(), "correlator: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn correlator() -> EventCorrelator {
        EventCorrelator::new(Arc::new(DescriptorRegistry::only(&[CLOUD_STORAGE_SOURCE]).unwrap()))
    }

    fn owner(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: SOURCES_API_VERSION.into(),
            kind: kind.into(),
            name: name.into(),
            uid: format!("uid-{name}"),
            controller: true,
        }
    }

    fn topic(name: &str, owners: Vec<OwnerReference>) -> Arc<Topic> {
        let mut meta = ObjectMeta::new("default", name);
        meta.owner_references = owners;
        Arc::new(Topic::new(meta, TopicSpec::default()))
    }

    #[test]
    fn sources_map_to_themselves_when_owned() {
        let c = correlator();
        let owned = Arc::new(Source::new(CLOUD_STORAGE_SOURCE, "default", "a", SourceSpec::default()));
        let foreign = Arc::new(Source::new(CLOUD_PUBSUB_SOURCE, "default", "b", SourceSpec::default()));
        assert_eq!(c.on_source(&WatchEvent::Added(owned)), Some(ObjectKey::new("default", "a")));
        assert_eq!(c.on_source(&WatchEvent::Added(foreign)), None);
    }

    #[test]
    fn children_map_to_their_controlling_owner() {
        let mut c = correlator();
        let ev = WatchEvent::Modified(topic("a", vec![owner(CLOUD_STORAGE_SOURCE, "parent")]));
        assert_eq!(c.on_child(ChildKind::Topic, &ev), vec![ObjectKey::new("default", "parent")]);
        assert_eq!(c.tracked(), 1);
    }

    #[test]
    fn foreign_and_non_controller_owners_are_ignored() {
        let mut c = correlator();
        let mut weak = owner(CLOUD_STORAGE_SOURCE, "parent");
        weak.controller = false;
        let mut other_group = owner(CLOUD_STORAGE_SOURCE, "parent");
        other_group.api_version = "apps/v1".into();
        for owners in [vec![], vec![weak], vec![other_group], vec![owner(CLOUD_PUBSUB_SOURCE, "p")]] {
            let ev = WatchEvent::Added(topic("orphan", owners));
            assert!(c.on_child(ChildKind::Topic, &ev).is_empty());
        }
        assert_eq!(c.tracked(), 0);
    }

    #[test]
    fn moved_or_dropped_owners_wake_the_previous_parent() {
        let mut c = correlator();
        c.on_child(ChildKind::Topic, &WatchEvent::Added(topic("t", vec![owner(CLOUD_STORAGE_SOURCE, "p1")])));

        let moved = WatchEvent::Modified(topic("t", vec![owner(CLOUD_STORAGE_SOURCE, "p2")]));
        assert_eq!(
            c.on_child(ChildKind::Topic, &moved),
            vec![ObjectKey::new("default", "p2"), ObjectKey::new("default", "p1")]
        );

        let dropped = WatchEvent::Modified(topic("t", vec![]));
        assert_eq!(c.on_child(ChildKind::Topic, &dropped), vec![ObjectKey::new("default", "p2")]);
        assert_eq!(c.tracked(), 0);
    }

    #[test]
    fn deletes_consult_and_clear_the_relation() {
        let mut c = correlator();
        let t = topic("t", vec![owner(CLOUD_STORAGE_SOURCE, "p1")]);
        c.on_child(ChildKind::Topic, &WatchEvent::Added(t.clone()));
        // same child name under another kind is a separate relation
        c.on_child(ChildKind::PullSubscription, &WatchEvent::Added(t.clone()));
        assert_eq!(c.tracked(), 2);
        assert_eq!(c.on_child(ChildKind::Topic, &WatchEvent::Deleted(t)), vec![ObjectKey::new("default", "p1")]);
        assert_eq!(c.tracked(), 1);
    }

    #[tokio::test]
    async fn run_feeds_the_queue_and_stops_on_cancel() {
        let (src_tx, sources) = flume::unbounded();
        let (topic_tx, topics) = flume::unbounded();
        let (_sub_tx, pull_subscriptions) = flume::unbounded();
        let queue = WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1));
        let token = CancellationToken::new();
        let task = tokio::spawn(correlator().run(
            WatchStreams {
                sources,
                topics,
                pull_subscriptions,
            },
            queue.clone(),
            token.clone(),
        ));

        src_tx
            .send(WatchEvent::Added(Arc::new(Source::new(CLOUD_STORAGE_SOURCE, "default", "a", SourceSpec::default()))))
            .unwrap();
        topic_tx
            .send(WatchEvent::Modified(topic("a", vec![owner(CLOUD_STORAGE_SOURCE, "a")])))
            .unwrap();

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        token.cancel();
        task.await.unwrap();
    }
}
