//! # ComponentPlan
//!
//! Reconciliation of one desired release.
//!
//! - `state` - pure phase derivation and next-step decision
//! - `status` - change-detecting, `resourceVersion`-guarded status writes
//! - `manifest` - manifest preview summary and ConfigMap storage
//! - `latest` - `latest` flag across plans sharing a release name
//! - `reconciler` - applies the decided step

mod latest;
mod manifest;
mod reconciler;
mod state;
mod status;

pub use latest::{compute_latest, spawn_latest_refresh};
pub use manifest::{manifest_configmap_name, summarize_manifest, ManifestSummary};
pub use reconciler::{reconcile_component_plan, PlanContext};
pub use state::{
    actioned_condition, approval_condition, derive_phase, fold_succeeded, next_step,
    retry_exhausted_condition, seed_conditions, PlanPhase, PlanStep, ReleaseAction, StepInputs,
};
pub use status::{status_changed, StatusUpdate};
