//! # Annotation-encoded State
//!
//! Typed accessors for the few facts the controller keeps in metadata rather than status:
//! the plan retry counter, the rollback request and the release ownership identity that
//! is written into the package-manager release description.

use crate::constants;
use crate::crd::ComponentPlan;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::fmt;

/// Failed attempts recorded against the current generation of the plan.
///
/// The counter carries the generation it was written for; a counter left over
/// from an older generation counts as zero. Malformed values count as zero.
pub fn retry_count(plan: &ComponentPlan) -> u32 {
    let annotations = plan.annotations();
    let stale = annotations
        .get(constants::RETRY_GENERATION_ANNOTATION)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .is_some_and(|generation| generation != plan.generation());
    if stale {
        return 0;
    }
    annotations
        .get(constants::RETRY_ANNOTATION)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// A retry counter is present, whatever generation it belongs to
pub fn has_retry_record(plan: &ComponentPlan) -> bool {
    plan.annotations().contains_key(constants::RETRY_ANNOTATION)
}

/// Merge patch setting the retry counter for the current generation, or clearing
/// it when `None`
pub fn retry_count_patch(plan: &ComponentPlan, count: Option<u32>) -> Value {
    json!({
        "metadata": {
            "annotations": {
                constants::RETRY_ANNOTATION: count.map(|c| c.to_string()),
                constants::RETRY_GENERATION_ANNOTATION: count.map(|_| plan.generation().to_string()),
            }
        }
    })
}

/// A rollback to the installed revision was requested
pub fn rollback_requested(plan: &ComponentPlan) -> bool {
    plan.annotations()
        .get(constants::ROLLBACK_ANNOTATION)
        .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}

pub fn clear_rollback_patch() -> Value {
    json!({
        "metadata": {
            "annotations": {
                constants::ROLLBACK_ANNOTATION: Value::Null
            }
        }
    })
}

/// Plan snapshot that produced a release, encoded as `namespace/name/uid/generation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseIdentity {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub generation: i64,
}

impl ReleaseIdentity {
    pub fn from_plan(plan: &ComponentPlan) -> Self {
        Self {
            namespace: plan.namespace_or_default().to_string(),
            name: plan.name_or_unknown().to_string(),
            uid: plan.uid().to_string(),
            generation: plan.generation(),
        }
    }

    /// Parse a release description; `None` for foreign or rollback descriptions
    pub fn decode(description: &str) -> Option<Self> {
        let mut parts = description.trim().splitn(4, '/');
        let namespace = parts.next()?;
        let name = parts.next()?;
        let uid = parts.next()?;
        let generation = parts.next()?.parse().ok()?;
        if namespace.is_empty() || name.is_empty() || uid.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            generation,
        })
    }

    /// Same plan object, whatever its generation
    pub fn same_plan(&self, other: &ReleaseIdentity) -> bool {
        self.namespace == other.namespace && self.name == other.name && self.uid == other.uid
    }
}

impl fmt::Display for ReleaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.name, self.uid, self.generation
        )
    }
}

/// Description written by the package manager for rollback revisions
pub fn is_rollback_description(description: &str) -> bool {
    description.starts_with("Rollback to ")
}

/// Decide whether the deployed release was produced by `plan`.
///
/// The identity in the description is authoritative. When it is absent (older
/// releases) or replaced by a rollback description, the release revision must
/// match the revision the plan recorded.
pub fn release_owned_by(plan: &ComponentPlan, description: &str, revision: i32) -> bool {
    if !is_rollback_description(description) {
        if let Some(identity) = ReleaseIdentity::decode(description) {
            return identity.same_plan(&ReleaseIdentity::from_plan(plan));
        }
    }
    let installed = plan.installed_revision();
    installed != 0 && installed == revision
}
