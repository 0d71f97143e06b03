//! # Conditions
//!
//! Typed condition records attached to every custom resource managed by the controller.
//!
//! Two access patterns are provided:
//!
//! - [`ConditionedStatus`] is a keyed set: at most one entry per [`ConditionType`],
//!   last write wins, position of an existing entry is preserved.
//! - [`update_cond_with_fixed_len`] maintains a bounded append-only history where the
//!   order of transitions matters more than per-type deduplication (repository
//!   availability and URL history).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tri-state status of a condition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize, JsonSchema,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Condition types recorded by the controller
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum ConditionType {
    /// Repository index reachable (repository)
    Ready,
    /// Last repository sync outcome (repository, subscription)
    Synced,
    /// Plan approved for installation (component plan)
    Approved,
    /// Current release action and its outcome (component plan)
    Actioned,
    /// Derived: every other condition is true (component plan)
    Succeeded,
    /// Repository URL recorded in the URL history (repository)
    #[serde(rename = "URLChanged")]
    UrlChanged,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::Synced => "Synced",
            ConditionType::Approved => "Approved",
            ConditionType::Actioned => "Actioned",
            ConditionType::Succeeded => "Succeeded",
            ConditionType::UrlChanged => "URLChanged",
        }
    }
}

/// Machine-readable reason attached to a condition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize, JsonSchema,
)]
pub enum ConditionReason {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    // Repository
    Available,
    Unavailable,
    ReconcileSuccess,
    ReconcileError,
    Creating,
    // Component plan approval
    Approved,
    NotApproved,
    // Component plan release actions
    WaitDo,
    Installing,
    InstallSuccess,
    InstallFailed,
    Upgrading,
    UpgradeSuccess,
    UpgradeFailed,
    Uninstalling,
    UninstallSuccess,
    UninstallFailed,
    RollingBack,
    RollBackSuccess,
    RollBackFailed,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Unspecified => "",
            ConditionReason::Available => "Available",
            ConditionReason::Unavailable => "Unavailable",
            ConditionReason::ReconcileSuccess => "ReconcileSuccess",
            ConditionReason::ReconcileError => "ReconcileError",
            ConditionReason::Creating => "Creating",
            ConditionReason::Approved => "Approved",
            ConditionReason::NotApproved => "NotApproved",
            ConditionReason::WaitDo => "WaitDo",
            ConditionReason::Installing => "Installing",
            ConditionReason::InstallSuccess => "InstallSuccess",
            ConditionReason::InstallFailed => "InstallFailed",
            ConditionReason::Upgrading => "Upgrading",
            ConditionReason::UpgradeSuccess => "UpgradeSuccess",
            ConditionReason::UpgradeFailed => "UpgradeFailed",
            ConditionReason::Uninstalling => "Uninstalling",
            ConditionReason::UninstallSuccess => "UninstallSuccess",
            ConditionReason::UninstallFailed => "UninstallFailed",
            ConditionReason::RollingBack => "RollingBack",
            ConditionReason::RollBackSuccess => "RollBackSuccess",
            ConditionReason::RollBackFailed => "RollBackFailed",
        }
    }

    /// A package-manager action for this plan is in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ConditionReason::Installing | ConditionReason::Upgrading | ConditionReason::RollingBack
        )
    }
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents a single observed fact about a resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Reason for the condition
    #[serde(default)]
    pub reason: ConditionReason,
    /// Message describing the condition
    #[serde(default)]
    pub message: String,
    /// Last transition time (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Build a condition stamped with the current time
    pub fn new(
        r#type: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type,
            status,
            reason,
            message: message.into(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Placeholder returned for types that were never recorded
    pub fn unknown(r#type: ConditionType) -> Self {
        Self {
            r#type,
            status: ConditionStatus::Unknown,
            reason: ConditionReason::Unspecified,
            message: String::new(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Equality ignoring the transition timestamp
    pub fn same_as(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    fn sort_key(&self) -> (ConditionType, ConditionStatus, ConditionReason, &str) {
        (self.r#type, self.status, self.reason, self.message.as_str())
    }
}

/// Keyed set of conditions, unique by type
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct ConditionedStatus {
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    pub fn new(conditions: Vec<Condition>) -> Self {
        let mut status = Self::default();
        status.set_conditions(conditions);
        status
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Stored condition for `r#type`, or a synthetic `Unknown` one
    pub fn get_condition(&self, r#type: ConditionType) -> Condition {
        self.conditions
            .iter()
            .find(|c| c.r#type == r#type)
            .cloned()
            .unwrap_or_else(|| Condition::unknown(r#type))
    }

    pub fn is_condition_true(&self, r#type: ConditionType) -> bool {
        self.conditions
            .iter()
            .any(|c| c.r#type == r#type && c.is_true())
    }

    /// Replace same-typed entries in place or append new ones.
    ///
    /// A condition equal to the stored one (ignoring time) leaves the stored
    /// entry untouched, so its transition time only moves on real transitions.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            match self
                .conditions
                .iter_mut()
                .find(|existing| existing.r#type == condition.r#type)
            {
                Some(existing) if existing.same_as(&condition) => {}
                Some(existing) => *existing = condition,
                None => self.conditions.push(condition),
            }
        }
    }

    /// Same length and same multiset of (type, status, reason, message)
    pub fn equal(&self, other: &ConditionedStatus) -> bool {
        if self.conditions.len() != other.conditions.len() {
            return false;
        }
        let mut left: Vec<_> = self.conditions.iter().map(Condition::sort_key).collect();
        let mut right: Vec<_> = other.conditions.iter().map(Condition::sort_key).collect();
        left.sort_unstable();
        right.sort_unstable();
        left == right
    }
}

/// Nil-aware equality: a missing set equals only a missing or empty one
pub fn conditioned_status_equal(
    left: Option<&ConditionedStatus>,
    right: Option<&ConditionedStatus>,
) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(set), None) | (None, Some(set)) => set.is_empty(),
        (Some(left), Some(right)) => left.equal(right),
    }
}

/// Append `cond` to `status` and keep only the newest `max(len, 1)` records
pub fn update_cond_with_fixed_len(
    len: usize,
    status: &[Condition],
    cond: Condition,
) -> Vec<Condition> {
    let bound = len.max(1);
    let mut log = Vec::with_capacity(status.len() + 1);
    log.extend_from_slice(status);
    log.push(cond);
    if log.len() > bound {
        log.drain(..log.len() - bound);
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(t: ConditionType, s: ConditionStatus, reason: ConditionReason, msg: &str) -> Condition {
        Condition::new(t, s, reason, msg)
    }

    #[test]
    fn test_get_condition_absent_is_unknown() {
        let status = ConditionedStatus::default();
        let got = status.get_condition(ConditionType::Actioned);
        assert_eq!(got.r#type, ConditionType::Actioned);
        assert_eq!(got.status, ConditionStatus::Unknown);
        assert!(got.last_transition_time.is_none());
    }

    #[test]
    fn test_set_conditions_replaces_in_place() {
        let mut status = ConditionedStatus::new(vec![
            cond(ConditionType::Approved, ConditionStatus::False, ConditionReason::NotApproved, ""),
            cond(ConditionType::Actioned, ConditionStatus::Unknown, ConditionReason::WaitDo, ""),
        ]);
        status.set_conditions([cond(
            ConditionType::Approved,
            ConditionStatus::True,
            ConditionReason::Approved,
            "",
        )]);
        assert_eq!(status.len(), 2);
        assert_eq!(status.conditions[0].r#type, ConditionType::Approved);
        assert!(status.conditions[0].is_true());
    }

    #[test]
    fn test_set_conditions_keeps_timestamp_when_unchanged() {
        let mut original = cond(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available, "ok");
        original.last_transition_time = Some("2024-01-01T00:00:00+00:00".to_string());
        let mut status = ConditionedStatus::new(vec![original]);
        status.set_conditions([cond(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available,
            "ok",
        )]);
        assert_eq!(
            status.conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_equal_ignores_order_and_time() {
        let a = ConditionedStatus::new(vec![
            cond(ConditionType::Approved, ConditionStatus::True, ConditionReason::Approved, ""),
            cond(ConditionType::Succeeded, ConditionStatus::False, ConditionReason::Unspecified, ""),
        ]);
        let mut b = ConditionedStatus::new(vec![
            cond(ConditionType::Succeeded, ConditionStatus::False, ConditionReason::Unspecified, ""),
            cond(ConditionType::Approved, ConditionStatus::True, ConditionReason::Approved, ""),
        ]);
        b.conditions[0].last_transition_time = None;
        assert!(a.equal(&b));
        assert!(b.equal(&a));
    }

    #[test]
    fn test_nil_equality() {
        let empty = ConditionedStatus::default();
        assert!(conditioned_status_equal(None, None));
        assert!(conditioned_status_equal(None, Some(&empty)));
        let one = ConditionedStatus::new(vec![Condition::unknown(ConditionType::Ready)]);
        assert!(!conditioned_status_equal(None, Some(&one)));
    }

    #[test]
    fn test_fixed_len_zero_keeps_newest() {
        let first = cond(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available, "1");
        let second = cond(ConditionType::Ready, ConditionStatus::False, ConditionReason::Unavailable, "2");
        let log = update_cond_with_fixed_len(0, &[first], second.clone());
        assert_eq!(log.len(), 1);
        assert!(log[0].same_as(&second));
    }

    #[test]
    fn test_serialized_reason_names() {
        let c = cond(ConditionType::UrlChanged, ConditionStatus::True, ConditionReason::Unspecified, "u");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "URLChanged");
        assert_eq!(json["reason"], "");
        assert_eq!(json["status"], "True");
    }
}
