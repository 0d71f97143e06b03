//! # Plan State Machine
//!
//! Pure decision functions for ComponentPlan reconciliation. Nothing here talks to
//! the cluster: the reconciler gathers the facts into [`StepInputs`], asks
//! [`next_step`] what to do and applies the result.
//!
//! ## Decision order
//!
//! 1. Deletion: uninstall, then release the finalizer
//! 2. Finalizer and release label
//! 3. Seed conditions on first sight
//! 4. Mirror `spec.approved` into the `Approved` condition
//! 5. Render the manifest preview for a new generation
//! 6. Stop once the retry budget is spent
//! 7. Wait for approval
//! 8. Rollback on request
//! 9. Poll an in-flight install or upgrade
//! 10. Nothing to do once succeeded
//! 11. Install or upgrade

use crate::constants;
use crate::crd::{
    ComponentPlan, Condition, ConditionReason, ConditionStatus, ConditionType, ConditionedStatus,
};
use kube::ResourceExt;

/// Conceptual lifecycle position of a plan, derived from its conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPhase {
    Uninitialized,
    WaitingForComponent,
    WaitingForManifest,
    WaitingForApproval,
    Installing,
    Upgrading,
    RollingBack,
    Succeeded,
    Failed,
    MaxRetriesExceeded,
    Uninstalling,
    Uninstalled,
    UninstallFailed,
}

impl PlanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPhase::Uninitialized => "Uninitialized",
            PlanPhase::WaitingForComponent => "WaitingForComponent",
            PlanPhase::WaitingForManifest => "WaitingForManifest",
            PlanPhase::WaitingForApproval => "WaitingForApproval",
            PlanPhase::Installing => "Installing",
            PlanPhase::Upgrading => "Upgrading",
            PlanPhase::RollingBack => "RollingBack",
            PlanPhase::Succeeded => "Succeeded",
            PlanPhase::Failed => "Failed",
            PlanPhase::MaxRetriesExceeded => "MaxRetriesExceeded",
            PlanPhase::Uninstalling => "Uninstalling",
            PlanPhase::Uninstalled => "Uninstalled",
            PlanPhase::UninstallFailed => "UninstallFailed",
        }
    }
}

impl std::fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the phase of `plan` given its retry budget
pub fn derive_phase(plan: &ComponentPlan, retry_count: u32, max_retry: u32) -> PlanPhase {
    let conditions = plan.conditions();
    let actioned = conditions.get_condition(ConditionType::Actioned).reason;

    if plan.metadata.deletion_timestamp.is_some() {
        return match actioned {
            ConditionReason::UninstallSuccess => PlanPhase::Uninstalled,
            ConditionReason::UninstallFailed => PlanPhase::UninstallFailed,
            _ => PlanPhase::Uninstalling,
        };
    }
    if conditions.is_empty() {
        return PlanPhase::Uninitialized;
    }
    if plan.generation_advanced() {
        return PlanPhase::WaitingForManifest;
    }
    if retry_count >= max_retry && !conditions.is_condition_true(ConditionType::Succeeded) {
        return PlanPhase::MaxRetriesExceeded;
    }
    if !conditions.is_condition_true(ConditionType::Approved) {
        return PlanPhase::WaitingForApproval;
    }
    match actioned {
        ConditionReason::Installing => PlanPhase::Installing,
        ConditionReason::Upgrading => PlanPhase::Upgrading,
        ConditionReason::RollingBack => PlanPhase::RollingBack,
        ConditionReason::InstallFailed
        | ConditionReason::UpgradeFailed
        | ConditionReason::RollBackFailed => PlanPhase::Failed,
        _ if conditions.is_condition_true(ConditionType::Succeeded) => PlanPhase::Succeeded,
        _ => PlanPhase::WaitingForComponent,
    }
}

/// Release action chosen for an approved plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Install,
    Upgrade,
}

impl ReleaseAction {
    /// Pick install for a plan that never produced a revision
    pub fn for_plan(plan: &ComponentPlan) -> Self {
        if plan.installed_revision() == 0 {
            ReleaseAction::Install
        } else {
            ReleaseAction::Upgrade
        }
    }

    pub fn from_reason(reason: ConditionReason) -> Option<Self> {
        match reason {
            ConditionReason::Installing => Some(ReleaseAction::Install),
            ConditionReason::Upgrading => Some(ReleaseAction::Upgrade),
            _ => None,
        }
    }

    pub fn in_progress(&self) -> ConditionReason {
        match self {
            ReleaseAction::Install => ConditionReason::Installing,
            ReleaseAction::Upgrade => ConditionReason::Upgrading,
        }
    }

    pub fn succeeded(&self) -> ConditionReason {
        match self {
            ReleaseAction::Install => ConditionReason::InstallSuccess,
            ReleaseAction::Upgrade => ConditionReason::UpgradeSuccess,
        }
    }

    pub fn failed(&self) -> ConditionReason {
        match self {
            ReleaseAction::Install => ConditionReason::InstallFailed,
            ReleaseAction::Upgrade => ConditionReason::UpgradeFailed,
        }
    }
}

/// Facts the reconciler gathers before deciding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInputs {
    pub max_retry: u32,
    pub retry_count: u32,
    /// The manifest ConfigMap of the plan exists
    pub manifest_cached: bool,
    pub rollback_requested: bool,
}

/// The single next thing the reconciler should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    /// Deleted plan: drive the uninstall job
    Uninstall,
    /// Uninstall confirmed: drop the finalizer
    RemoveFinalizer,
    /// Add the finalizer and the release label
    EnsureMetadata,
    /// Write the initial `Approved`, `Actioned=WaitDo`, `Succeeded=False` conditions
    Seed,
    /// `spec.approved` changed
    SyncApproval,
    /// Render the manifest preview and observe the current generation
    RenderManifest,
    /// Retry budget spent; pin `Succeeded=False`
    GiveUp,
    /// Unapproved; stop after the preview
    AwaitApproval,
    Rollback,
    /// Rollback requested before any revision exists
    DiscardRollback,
    /// Install or upgrade in flight; poll the pool
    Poll(ReleaseAction),
    Release(ReleaseAction),
    Idle,
}

/// Decide the next step for `plan`
pub fn next_step(plan: &ComponentPlan, inputs: &StepInputs) -> PlanStep {
    let conditions = plan.conditions();
    let actioned = conditions.get_condition(ConditionType::Actioned).reason;

    if plan.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(plan) {
            return PlanStep::Idle;
        }
        return match actioned {
            ConditionReason::UninstallSuccess => PlanStep::RemoveFinalizer,
            ConditionReason::UninstallFailed => PlanStep::Idle,
            _ => PlanStep::Uninstall,
        };
    }

    if !has_finalizer(plan) || !has_release_label(plan) {
        return PlanStep::EnsureMetadata;
    }
    if conditions.is_empty() {
        return PlanStep::Seed;
    }
    if conditions.is_condition_true(ConditionType::Approved) != plan.spec.approved {
        return PlanStep::SyncApproval;
    }
    if plan.generation_advanced() || !inputs.manifest_cached {
        return PlanStep::RenderManifest;
    }
    if inputs.retry_count >= inputs.max_retry {
        return PlanStep::GiveUp;
    }
    if !plan.spec.approved {
        return PlanStep::AwaitApproval;
    }
    if inputs.rollback_requested {
        return if plan.installed_revision() > 0 {
            PlanStep::Rollback
        } else {
            PlanStep::DiscardRollback
        };
    }
    if let Some(action) = ReleaseAction::from_reason(actioned) {
        return PlanStep::Poll(action);
    }
    if conditions.is_condition_true(ConditionType::Succeeded) {
        return PlanStep::Idle;
    }
    PlanStep::Release(ReleaseAction::for_plan(plan))
}

pub fn has_finalizer(plan: &ComponentPlan) -> bool {
    plan.finalizers().iter().any(|f| f == constants::FINALIZER)
}

pub fn has_release_label(plan: &ComponentPlan) -> bool {
    plan.labels()
        .get(constants::RELEASE_LABEL)
        .is_some_and(|release| *release == plan.spec.name)
}

/// `Approved` condition mirroring `spec.approved`
pub fn approval_condition(approved: bool) -> Condition {
    if approved {
        Condition::new(
            ConditionType::Approved,
            ConditionStatus::True,
            ConditionReason::Approved,
            "",
        )
    } else {
        Condition::new(
            ConditionType::Approved,
            ConditionStatus::False,
            ConditionReason::NotApproved,
            "",
        )
    }
}

/// `Actioned` condition for `reason`; status follows the outcome the reason implies
pub fn actioned_condition(reason: ConditionReason, message: impl Into<String>) -> Condition {
    let status = match reason {
        ConditionReason::InstallSuccess
        | ConditionReason::UpgradeSuccess
        | ConditionReason::RollBackSuccess
        | ConditionReason::UninstallSuccess => ConditionStatus::True,
        ConditionReason::Installing
        | ConditionReason::Upgrading
        | ConditionReason::RollingBack
        | ConditionReason::Uninstalling => ConditionStatus::Unknown,
        _ => ConditionStatus::False,
    };
    Condition::new(ConditionType::Actioned, status, reason, message)
}

/// Conditions written on first sight
pub fn seed_conditions(plan: &ComponentPlan) -> ConditionedStatus {
    ConditionedStatus::new(vec![
        approval_condition(plan.spec.approved),
        actioned_condition(ConditionReason::WaitDo, ""),
        Condition::new(
            ConditionType::Succeeded,
            ConditionStatus::False,
            ConditionReason::Unspecified,
            "",
        ),
    ])
}

/// Re-derive `Succeeded`: true iff every other condition is true
pub fn fold_succeeded(conditions: &mut ConditionedStatus) {
    let all_true = conditions
        .conditions
        .iter()
        .filter(|c| c.r#type != ConditionType::Succeeded)
        .all(Condition::is_true);
    let any_other = conditions
        .conditions
        .iter()
        .any(|c| c.r#type != ConditionType::Succeeded);
    conditions.set_conditions([Condition::new(
        ConditionType::Succeeded,
        ConditionStatus::from(all_true && any_other),
        ConditionReason::Unspecified,
        "",
    )]);
}

/// `Succeeded=False` pinned by an exhausted retry budget
pub fn retry_exhausted_condition() -> Condition {
    Condition::new(
        ConditionType::Succeeded,
        ConditionStatus::False,
        ConditionReason::Unspecified,
        constants::RETRY_LIMIT_EXCEEDED,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ComponentPlanSpec, ComponentPlanStatus, NamespacedRef};

    fn plan(approved: bool) -> ComponentPlan {
        let mut plan = ComponentPlan::new(
            "nginx-1",
            ComponentPlanSpec {
                component_ref: NamespacedRef::new("kubebb-system", "kubebb.nginx"),
                install_version: "1.0.0".to_string(),
                name: "my-nginx".to_string(),
                approved,
                override_values: Default::default(),
                config: Default::default(),
                creator: None,
            },
        );
        plan.metadata.namespace = Some("default".to_string());
        plan.metadata.generation = Some(1);
        plan.metadata.finalizers = Some(vec![constants::FINALIZER.to_string()]);
        plan.metadata.labels = Some(
            [(constants::RELEASE_LABEL.to_string(), "my-nginx".to_string())]
                .into_iter()
                .collect(),
        );
        plan
    }

    fn with_status(mut plan: ComponentPlan, conditions: Vec<Condition>, revision: i32) -> ComponentPlan {
        let mut set = ConditionedStatus::new(conditions);
        fold_succeeded(&mut set);
        plan.status = Some(ComponentPlanStatus {
            conditions: set,
            installed_revision: revision,
            observed_generation: plan.metadata.generation,
            ..Default::default()
        });
        plan
    }

    fn inputs() -> StepInputs {
        StepInputs {
            max_retry: 5,
            retry_count: 0,
            manifest_cached: true,
            rollback_requested: false,
        }
    }

    #[test]
    fn test_first_sight_adds_metadata_then_seeds() {
        let mut bare = plan(true);
        bare.metadata.finalizers = None;
        assert_eq!(next_step(&bare, &inputs()), PlanStep::EnsureMetadata);
        assert_eq!(next_step(&plan(true), &inputs()), PlanStep::Seed);
        assert_eq!(derive_phase(&plan(true), 0, 5), PlanPhase::Uninitialized);
    }

    #[test]
    fn test_seed_conditions_shape() {
        let seeded = seed_conditions(&plan(false));
        assert_eq!(seeded.len(), 3);
        assert_eq!(
            seeded.get_condition(ConditionType::Actioned).reason,
            ConditionReason::WaitDo
        );
        assert_eq!(
            seeded.get_condition(ConditionType::Approved).reason,
            ConditionReason::NotApproved
        );
        assert!(!seeded.is_condition_true(ConditionType::Succeeded));
    }

    #[test]
    fn test_new_generation_renders_manifest() {
        let mut p = with_status(plan(true), seed_conditions(&plan(true)).conditions, 0);
        p.metadata.generation = Some(2);
        assert_eq!(next_step(&p, &inputs()), PlanStep::RenderManifest);

        let p = with_status(plan(true), seed_conditions(&plan(true)).conditions, 0);
        let uncached = StepInputs {
            manifest_cached: false,
            ..inputs()
        };
        assert_eq!(next_step(&p, &uncached), PlanStep::RenderManifest);
    }

    #[test]
    fn test_unapproved_stops_after_preview() {
        let p = with_status(plan(false), seed_conditions(&plan(false)).conditions, 0);
        assert_eq!(next_step(&p, &inputs()), PlanStep::AwaitApproval);
        assert_eq!(derive_phase(&p, 0, 5), PlanPhase::WaitingForApproval);
    }

    #[test]
    fn test_approval_change_is_synced() {
        let p = with_status(plan(true), seed_conditions(&plan(false)).conditions, 0);
        assert_eq!(next_step(&p, &inputs()), PlanStep::SyncApproval);
    }

    #[test]
    fn test_install_then_upgrade() {
        let p = with_status(plan(true), seed_conditions(&plan(true)).conditions, 0);
        assert_eq!(
            next_step(&p, &inputs()),
            PlanStep::Release(ReleaseAction::Install)
        );

        let failed = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::UpgradeFailed, "boom"),
            ],
            3,
        );
        assert_eq!(
            next_step(&failed, &inputs()),
            PlanStep::Release(ReleaseAction::Upgrade)
        );
        assert_eq!(derive_phase(&failed, 1, 5), PlanPhase::Failed);
    }

    #[test]
    fn test_in_flight_action_is_polled_not_restarted() {
        let p = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::Installing, ""),
            ],
            0,
        );
        assert!(p.is_helm_doing());
        assert_eq!(next_step(&p, &inputs()), PlanStep::Poll(ReleaseAction::Install));
        assert_eq!(derive_phase(&p, 0, 5), PlanPhase::Installing);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let p = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::InstallFailed, "boom"),
            ],
            0,
        );
        let spent = StepInputs {
            retry_count: 5,
            ..inputs()
        };
        assert_eq!(next_step(&p, &spent), PlanStep::GiveUp);
        assert_eq!(derive_phase(&p, 5, 5), PlanPhase::MaxRetriesExceeded);

        // A new generation restarts the cycle from the preview
        let mut bumped = p.clone();
        bumped.metadata.generation = Some(2);
        assert_eq!(next_step(&bumped, &spent), PlanStep::RenderManifest);
    }

    #[test]
    fn test_succeeded_plan_is_idle() {
        let p = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::InstallSuccess, ""),
            ],
            1,
        );
        assert!(p.conditions().is_condition_true(ConditionType::Succeeded));
        assert_eq!(next_step(&p, &inputs()), PlanStep::Idle);
        assert_eq!(derive_phase(&p, 0, 5), PlanPhase::Succeeded);
    }

    #[test]
    fn test_rollback_requires_installed_revision() {
        let requested = StepInputs {
            rollback_requested: true,
            ..inputs()
        };
        let installed = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::UpgradeSuccess, ""),
            ],
            2,
        );
        assert_eq!(next_step(&installed, &requested), PlanStep::Rollback);

        let fresh = with_status(plan(true), seed_conditions(&plan(true)).conditions, 0);
        assert_eq!(next_step(&fresh, &requested), PlanStep::DiscardRollback);
    }

    #[test]
    fn test_deletion_waits_for_uninstall() {
        let mut p = with_status(
            plan(true),
            vec![
                approval_condition(true),
                actioned_condition(ConditionReason::InstallSuccess, ""),
            ],
            1,
        );
        p.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
        assert_eq!(next_step(&p, &inputs()), PlanStep::Uninstall);

        let mut done = p.clone();
        done.status.as_mut().unwrap().conditions.set_conditions([actioned_condition(
            ConditionReason::UninstallSuccess,
            "",
        )]);
        assert_eq!(next_step(&done, &inputs()), PlanStep::RemoveFinalizer);

        let mut failed = p.clone();
        failed.status.as_mut().unwrap().conditions.set_conditions([actioned_condition(
            ConditionReason::UninstallFailed,
            "boom",
        )]);
        assert_eq!(next_step(&failed, &inputs()), PlanStep::Idle);
        assert_eq!(derive_phase(&failed, 0, 5), PlanPhase::UninstallFailed);
    }

    #[test]
    fn test_fold_succeeded() {
        let mut set = ConditionedStatus::new(vec![
            approval_condition(true),
            actioned_condition(ConditionReason::InstallSuccess, ""),
        ]);
        fold_succeeded(&mut set);
        assert!(set.is_condition_true(ConditionType::Succeeded));

        set.set_conditions([approval_condition(false)]);
        fold_succeeded(&mut set);
        assert!(!set.is_condition_true(ConditionType::Succeeded));
    }
}
