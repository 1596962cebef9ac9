use chrono::{DateTime, Utc};
use evsrc_models::{ConditionManager, ConditionSet, SourceStatus};

/// A status being recomputed from the last written one. Conditions keep their
/// transition times unless their status actually changes, so recomputing an
/// unchanged world yields an equal status.
pub struct StatusDraft {
    set: ConditionSet,
    now: DateTime<Utc>,
    pub status: SourceStatus,
}

impl StatusDraft {
    pub fn new(set: ConditionSet, current: &SourceStatus) -> Self {
        Self::at(set, current, Utc::now())
    }

    pub fn at(set: ConditionSet, current: &SourceStatus, now: DateTime<Utc>) -> Self {
        let mut draft = Self {
            set,
            now,
            status: current.clone(),
        };
        draft.conditions().initialize();
        draft
    }

    pub fn conditions(&mut self) -> ConditionManager<'_> {
        self.set.manage_at(&mut self.status.conditions, self.now)
    }

    pub fn is_ready(&self) -> bool {
        self.set.is_happy(&self.status.conditions)
    }

    /// Whether writing the draft would change anything.
    pub fn differs_from(&self, current: &SourceStatus) -> bool {
        &self.status != current
    }

    pub fn into_status(self) -> SourceStatus {
        self.status
    }
}
