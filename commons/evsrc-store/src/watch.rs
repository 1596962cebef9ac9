use std::sync::Arc;

/// Change notification delivered to cache subscribers.
#[derive(Debug)]
pub enum WatchEvent<R> {
    Added(Arc<R>),
    Modified(Arc<R>),
    Deleted(Arc<R>),
}

impl<R> WatchEvent<R> {
    pub fn object(&self) -> &Arc<R> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }
}

// Manual impl: derive would require `R: Clone`.
impl<R> Clone for WatchEvent<R> {
    fn clone(&self) -> Self {
        match self {
            WatchEvent::Added(o) => WatchEvent::Added(o.clone()),
            WatchEvent::Modified(o) => WatchEvent::Modified(o.clone()),
            WatchEvent::Deleted(o) => WatchEvent::Deleted(o.clone()),
        }
    }
}
