//! Status conditions.
//!
//! Conditions follow the Kubernetes convention of one entry per condition
//! type. Setting a condition whose type is already present replaces the old
//! entry in place, so consumers always find at most one current condition
//! per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types maintained by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the external resource is available for use.
    Ready,
    /// Whether the last reconcile pass succeeded.
    Synced,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Synced => write!(f, "Synced"),
        }
    }
}

/// Condition status following Kubernetes conventions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Machine-readable reason for a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    Available,
    Unavailable,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Available => "Available",
            Self::Unavailable => "Unavailable",
            Self::Creating => "Creating",
            Self::Deleting => "Deleting",
            Self::ReconcileSuccess => "ReconcileSuccess",
            Self::ReconcileError => "ReconcileError",
        };
        f.write_str(s)
    }
}

/// A single status condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    pub fn new(type_: ConditionType, status: ConditionStatus, reason: Reason) -> Self {
        Self {
            type_,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The external resource is ready for use.
    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, Reason::Available)
    }

    /// The external resource is not ready for use.
    pub fn unavailable() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, Reason::Unavailable)
    }

    /// The external resource is being created or is still provisioning.
    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, Reason::Creating)
    }

    /// The external resource is being deleted.
    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, Reason::Deleting)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            Reason::ReconcileSuccess,
        )
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::False,
            Reason::ReconcileError,
        )
        .with_message(message)
    }

    /// Same condition apart from the transition time.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Ordered set of conditions keyed by condition type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a condition, replacing any existing condition of the same type.
    pub fn set(&mut self, condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.0.push(condition),
        }
    }

    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition of the given type is currently True.
    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare two sets ignoring transition times.
    pub fn equivalent(&self, other: &ConditionSet) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|c| other.get(c.type_).is_some_and(|o| c.equivalent(o)))
    }
}
