use chrono::{DateTime, Utc};
use evsrc_models::ObjectKey;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_FINALIZED: &str = "Finalized";

const EVENT_BUFFER: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub key: ObjectKey,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget event emitter. Recording never waits: when the buffer is
/// full or the sink is gone the event is dropped.
#[derive(Clone)]
pub struct EventRecorder {
    tx: flume::Sender<RecordedEvent>,
}

impl EventRecorder {
    pub fn new() -> (Self, flume::Receiver<RecordedEvent>) {
        let (tx, rx) = flume::bounded(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    pub fn record(&self, key: &ObjectKey, type_: EventType, reason: &str, message: impl Into<String>) {
        let event = RecordedEvent {
            key: key.clone(),
            type_,
            reason: reason.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.tx.try_send(event) {
            trace!(%key, reason, error = %e, "event dropped");
        }
    }

    pub fn normal(&self, key: &ObjectKey, reason: &str, message: impl Into<String>) {
        self.record(key, EventType::Normal, reason, message);
    }

    pub fn warning(&self, key: &ObjectKey, reason: &str, message: impl Into<String>) {
        self.record(key, EventType::Warning, reason, message);
    }
}

/// Drain recorded events into the log until cancelled or every recorder is
/// dropped.
pub async fn run_event_sink(rx: flume::Receiver<RecordedEvent>, token: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            ev = rx.recv_async() => match ev {
                Ok(ev) => ev,
                Err(_) => break,
            },
        };
        match event.type_ {
            EventType::Normal => {
                info!(key = %event.key, reason = %event.reason, "event: {}", event.message)
            }
            EventType::Warning => {
                warn!(key = %event.key, reason = %event.reason, "event: {}", event.message)
            }
        }
    }
}
