use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const READY: &str = "Ready";
pub const IDENTITY_VALIDATED: &str = "IdentityValidated";
pub const TOPIC_READY: &str = "TopicReady";
pub const PULL_SUBSCRIPTION_READY: &str = "PullSubscriptionReady";
pub const SINK_PROVIDED: &str = "SinkProvided";
pub const EXTERNAL_READY: &str = "ExternalReady";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// A happy condition plus the dependents whose conjunction it reflects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConditionSet {
    pub happy: &'static str,
    pub dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(happy: &'static str, dependents: &'static [&'static str]) -> Self {
        Self { happy, dependents }
    }

    pub fn manage<'a>(&'a self, conditions: &'a mut Vec<Condition>) -> ConditionManager<'a> {
        self.manage_at(conditions, Utc::now())
    }

    /// Like [`ConditionSet::manage`] with an explicit clock reading for
    /// transition timestamps.
    pub fn manage_at<'a>(
        &'a self,
        conditions: &'a mut Vec<Condition>,
        now: DateTime<Utc>,
    ) -> ConditionManager<'a> {
        ConditionManager {
            set: self,
            conditions,
            now,
        }
    }

    pub fn is_happy(&self, conditions: &[Condition]) -> bool {
        get_condition(conditions, self.happy).is_some_and(Condition::is_true)
    }
}

pub struct ConditionManager<'a> {
    set: &'a ConditionSet,
    conditions: &'a mut Vec<Condition>,
    now: DateTime<Utc>,
}

impl ConditionManager<'_> {
    /// Add every missing condition of the set as Unknown.
    pub fn initialize(&mut self) {
        let missing: Vec<&'static str> = std::iter::once(self.set.happy)
            .chain(self.set.dependents.iter().copied())
            .filter(|t| get_condition(self.conditions, t).is_none())
            .collect();
        for t in missing {
            self.upsert(t, ConditionStatus::Unknown, None, None);
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        get_condition(self.conditions, type_)
    }

    pub fn mark_true(&mut self, type_: &str) {
        self.upsert(type_, ConditionStatus::True, None, None);
        self.recompute_happy(type_);
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.upsert(
            type_,
            ConditionStatus::False,
            Some(reason.to_string()),
            Some(message.into()),
        );
        self.recompute_happy(type_);
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.upsert(
            type_,
            ConditionStatus::Unknown,
            Some(reason.to_string()),
            Some(message.into()),
        );
        self.recompute_happy(type_);
    }

    /// Copy status, reason and message from a condition reported elsewhere
    /// (e.g. a child's Ready condition) into `type_`.
    pub fn propagate(&mut self, type_: &str, source: &Condition, fallback_reason: &str) {
        match source.status {
            ConditionStatus::True => self.mark_true(type_),
            ConditionStatus::False => self.mark_false(
                type_,
                source.reason.as_deref().unwrap_or(fallback_reason),
                source.message.clone().unwrap_or_default(),
            ),
            ConditionStatus::Unknown => self.mark_unknown(
                type_,
                source.reason.as_deref().unwrap_or(fallback_reason),
                source.message.clone().unwrap_or_default(),
            ),
        }
    }

    pub fn is_happy(&self) -> bool {
        self.set.is_happy(self.conditions)
    }

    fn upsert(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
    ) {
        // lastTransitionTime only moves when status does.
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Some(self.now);
                }
                existing.reason = reason;
                existing.message = message;
            }
            None => {
                self.conditions.push(Condition {
                    type_: type_.to_string(),
                    status,
                    reason,
                    message,
                    last_transition_time: Some(self.now),
                });
                self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
    }

    fn recompute_happy(&mut self, changed: &str) {
        if changed == self.set.happy || !self.set.dependents.iter().any(|d| *d == changed) {
            return;
        }
        let mut first_unknown: Option<(Option<String>, Option<String>)> = None;
        for dep in self.set.dependents {
            match get_condition(self.conditions, dep) {
                Some(c) if c.is_false() => {
                    let (reason, message) = (c.reason.clone(), c.message.clone());
                    self.upsert(self.set.happy, ConditionStatus::False, reason, message);
                    return;
                }
                Some(c) if c.is_true() => {}
                Some(c) => {
                    if first_unknown.is_none() {
                        first_unknown = Some((c.reason.clone(), c.message.clone()));
                    }
                }
                None => {
                    if first_unknown.is_none() {
                        first_unknown = Some((None, None));
                    }
                }
            }
        }
        match first_unknown {
            None => self.upsert(self.set.happy, ConditionStatus::True, None, None),
            Some((reason, message)) => {
                self.upsert(self.set.happy, ConditionStatus::Unknown, reason, message)
            }
        }
    }
}
