//! # Plan Status Updates
//!
//! Status writes are computed against the observed object and skipped when nothing
//! changed. Writes carry the observed `resourceVersion`, so a concurrent update
//! surfaces as a 409 and the reconcile is retried against fresh state.

use super::state::fold_succeeded;
use crate::constants;
use crate::controller::error::Result;
use crate::crd::{conditioned_status_equal, ComponentPlan, ComponentPlanStatus, Condition};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

/// Desired status of a plan, built from the observed one
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    status: ComponentPlanStatus,
    /// Applied after `Succeeded` is re-derived
    pinned: Option<Condition>,
}

impl StatusUpdate {
    pub fn from_plan(plan: &ComponentPlan) -> Self {
        Self {
            status: plan.status.clone().unwrap_or_default(),
            pinned: None,
        }
    }

    pub fn conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.status.conditions.set_conditions(conditions);
        self
    }

    /// Keep `condition` as-is instead of the derived one of the same type
    pub fn pin(mut self, condition: Condition) -> Self {
        self.pinned = Some(condition);
        self
    }

    pub fn installed_revision(mut self, revision: i32) -> Self {
        self.status.installed_revision = revision;
        self
    }

    pub fn observed_generation(mut self, generation: i64) -> Self {
        self.status.observed_generation = Some(generation);
        self
    }

    pub fn manifest(mut self, summary: super::manifest::ManifestSummary) -> Self {
        self.status.resources = summary.resources;
        self.status.images = summary.images;
        self
    }

    pub fn latest(mut self, latest: bool) -> Self {
        self.status.latest = Some(latest);
        self
    }

    /// Final status with `Succeeded` re-derived
    pub fn build(self) -> ComponentPlanStatus {
        let mut status = self.status;
        fold_succeeded(&mut status.conditions);
        if let Some(pinned) = self.pinned {
            status.conditions.set_conditions([pinned]);
        }
        status
    }
}

/// `new` differs from the observed status in anything but timestamps
pub fn status_changed(old: Option<&ComponentPlanStatus>, new: &ComponentPlanStatus) -> bool {
    let Some(old) = old else {
        return true;
    };
    !conditioned_status_equal(Some(&old.conditions), Some(&new.conditions))
        || old.installed_revision != new.installed_revision
        || old.latest != new.latest
        || old.observed_generation != new.observed_generation
        || old.resources != new.resources
        || old.images != new.images
}

/// Write `update` if it changes anything; returns the updated object when written
pub async fn apply_status(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    update: StatusUpdate,
) -> Result<Option<ComponentPlan>> {
    let status = update.build();
    if !status_changed(plan.status.as_ref(), &status) {
        debug!("Status of {} unchanged, skipping update", plan.name_any());
        return Ok(None);
    }
    let patch = json!({
        "metadata": { "resourceVersion": plan.resource_version() },
        "status": status,
    });
    match api
        .patch_status(&plan.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await
    {
        Ok(updated) => Ok(Some(updated)),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(
                "ComponentPlan {} was deleted during reconciliation, skipping status update",
                plan.name_any()
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Unguarded metadata merge patch (annotations); returns the updated object
pub async fn patch_metadata(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    patch: Value,
) -> Result<ComponentPlan> {
    Ok(api
        .patch(&plan.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?)
}

/// Guarded patch adding the finalizer and the release label
pub async fn ensure_metadata(api: &Api<ComponentPlan>, plan: &ComponentPlan) -> Result<()> {
    let mut finalizers = plan.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == constants::FINALIZER) {
        finalizers.push(constants::FINALIZER.to_string());
    }
    let patch = json!({
        "metadata": {
            "resourceVersion": plan.resource_version(),
            "finalizers": finalizers,
            "labels": { constants::RELEASE_LABEL: plan.spec.name },
        }
    });
    api.patch(&plan.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Guarded patch dropping the finalizer
pub async fn remove_finalizer(api: &Api<ComponentPlan>, plan: &ComponentPlan) -> Result<()> {
    let finalizers: Vec<&String> = plan
        .finalizers()
        .iter()
        .filter(|f| *f != constants::FINALIZER)
        .collect();
    let patch = json!({
        "metadata": {
            "resourceVersion": plan.resource_version(),
            "finalizers": finalizers,
        }
    });
    match api
        .patch(&plan.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::plan::state::{actioned_condition, approval_condition, retry_exhausted_condition};
    use crate::crd::{ConditionReason, ConditionType, ComponentPlanSpec, NamespacedRef};

    fn plan_with(conditions: Vec<Condition>) -> ComponentPlan {
        let mut plan = ComponentPlan::new(
            "nginx-1",
            ComponentPlanSpec {
                component_ref: NamespacedRef::new("kubebb-system", "kubebb.nginx"),
                install_version: "1.0.0".to_string(),
                name: "my-nginx".to_string(),
                approved: true,
                override_values: Default::default(),
                config: Default::default(),
                creator: None,
            },
        );
        plan.status = Some(StatusUpdate::from_plan(&plan).conditions(conditions).build());
        plan
    }

    #[test]
    fn test_rewriting_same_conditions_is_no_change() {
        let plan = plan_with(vec![
            approval_condition(true),
            actioned_condition(ConditionReason::InstallSuccess, ""),
        ]);
        let again = StatusUpdate::from_plan(&plan)
            .conditions([actioned_condition(ConditionReason::InstallSuccess, "")])
            .build();
        assert!(!status_changed(plan.status.as_ref(), &again));
    }

    #[test]
    fn test_new_reason_is_a_change() {
        let plan = plan_with(vec![
            approval_condition(true),
            actioned_condition(ConditionReason::Installing, ""),
        ]);
        let done = StatusUpdate::from_plan(&plan)
            .conditions([actioned_condition(ConditionReason::InstallSuccess, "")])
            .installed_revision(1)
            .build();
        assert!(status_changed(plan.status.as_ref(), &done));
        assert!(done.conditions.is_condition_true(ConditionType::Succeeded));
        assert_eq!(done.installed_revision, 1);
    }

    #[test]
    fn test_pinned_condition_overrides_derivation() {
        let plan = plan_with(vec![
            approval_condition(true),
            actioned_condition(ConditionReason::InstallFailed, "boom"),
        ]);
        let status = StatusUpdate::from_plan(&plan)
            .pin(retry_exhausted_condition())
            .build();
        let succeeded = status.conditions.get_condition(ConditionType::Succeeded);
        assert!(!succeeded.is_true());
        assert_eq!(succeeded.message, constants::RETRY_LIMIT_EXCEEDED);
    }
}
