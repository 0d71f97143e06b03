//! # ComponentPlan Reconciler
//!
//! Gathers the facts about a plan, asks [`next_step`] what to do and applies that
//! one step. Package-manager work never runs here: install, upgrade, rollback and
//! uninstall are submitted to the [`ReleaseWorkerPool`] and polled on later passes.

use super::latest::spawn_latest_refresh;
use super::manifest::{manifest_cached, store_manifest, summarize_manifest};
use super::state::{
    actioned_condition, approval_condition, derive_phase, next_step, retry_exhausted_condition,
    seed_conditions, PlanStep, ReleaseAction, StepInputs,
};
use super::status::{apply_status, ensure_metadata, patch_metadata, remove_finalizer, StatusUpdate};
use crate::config::SharedControllerConfig;
use crate::controller::annotations::{
    clear_rollback_patch, has_retry_record, retry_count, retry_count_patch, rollback_requested,
};
use crate::controller::backoff::BackoffRegistry;
use crate::controller::error::{ReconcilerError, Result};
use crate::controller::release::{ChartRef, JobState, PoolError, Release, ReleaseWorkerPool};
use crate::controller::repository::CredentialSource;
use crate::controller::validation::validate_component_plan;
use crate::crd::{Component, ComponentPlan, Condition, ConditionReason, ConditionType, Repository};
use crate::observability;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Shared state of the ComponentPlan controller
pub struct PlanContext {
    pub client: Client,
    pub pool: Arc<ReleaseWorkerPool>,
    pub credentials: Arc<dyn CredentialSource>,
    pub config: SharedControllerConfig,
    pub backoff: BackoffRegistry,
}

impl std::fmt::Debug for PlanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanContext")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Where the chart of a plan comes from, or why it is not known yet
enum ChartSource {
    Ready {
        chart: ChartRef,
        repository_uid: String,
    },
    Waiting(String),
}

/// Requeue right away after a write that the next pass depends on
fn requeue_now() -> Action {
    Action::requeue(Duration::from_secs(1))
}

#[instrument(skip(plan, ctx), fields(plan = %plan.name_any(), namespace = ?plan.namespace()))]
pub async fn reconcile_component_plan(
    plan: Arc<ComponentPlan>,
    ctx: Arc<PlanContext>,
) -> Result<Action> {
    let started = std::time::Instant::now();
    observability::metrics::increment_reconciliations("componentplan");
    let namespace = plan.namespace().ok_or(ReconcilerError::MissingObjectKey)?;
    let api: Api<ComponentPlan> = Api::namespaced(ctx.client.clone(), &namespace);
    let resource_key = format!("{}/{}", namespace, plan.name_any());
    let deleting = plan.metadata.deletion_timestamp.is_some();

    if !deleting {
        if let Err(e) = validate_component_plan(&plan) {
            warn!("❌ ComponentPlan {} is invalid: {}", resource_key, e);
            apply_status(
                &api,
                &plan,
                StatusUpdate::from_plan(&plan)
                    .conditions([actioned_condition(ConditionReason::WaitDo, e.to_string())]),
            )
            .await?;
            return Ok(Action::await_change());
        }
    }

    let inputs = StepInputs {
        max_retry: ctx.config.max_retry(plan.spec.config.max_retry),
        retry_count: retry_count(&plan),
        manifest_cached: deleting || manifest_cached(&ctx.client, &plan).await?,
        rollback_requested: rollback_requested(&plan),
    };
    let step = next_step(&plan, &inputs);
    debug!(
        phase = %derive_phase(&plan, inputs.retry_count, inputs.max_retry),
        step = ?step,
        "Plan step decided"
    );

    let action = match step {
        PlanStep::Idle => Action::await_change(),
        PlanStep::EnsureMetadata => {
            ensure_metadata(&api, &plan).await?;
            requeue_now()
        }
        PlanStep::Seed => {
            info!("🌱 Seeding conditions of {}", resource_key);
            let mut update = StatusUpdate::from_plan(&plan);
            update = update.conditions(seed_conditions(&plan).conditions);
            apply_status(&api, &plan, update).await?;
            requeue_now()
        }
        PlanStep::SyncApproval => {
            info!("ComponentPlan {} approved={}", resource_key, plan.spec.approved);
            apply_status(
                &api,
                &plan,
                StatusUpdate::from_plan(&plan).conditions([approval_condition(plan.spec.approved)]),
            )
            .await?;
            requeue_now()
        }
        PlanStep::RenderManifest => render_manifest(&api, &plan, &ctx).await?,
        PlanStep::GiveUp => {
            if !plan
                .conditions()
                .get_condition(ConditionType::Succeeded)
                .same_as(&retry_exhausted_condition())
            {
                warn!(
                    "🛑 ComponentPlan {} failed {} times, waiting for a spec change",
                    resource_key, inputs.retry_count
                );
            }
            apply_status(
                &api,
                &plan,
                StatusUpdate::from_plan(&plan).pin(retry_exhausted_condition()),
            )
            .await?;
            Action::await_change()
        }
        PlanStep::AwaitApproval => {
            debug!("ComponentPlan {} is not approved, stopping after preview", resource_key);
            Action::await_change()
        }
        PlanStep::DiscardRollback => {
            warn!(
                "ComponentPlan {} has no installed revision, ignoring rollback request",
                resource_key
            );
            patch_metadata(&api, &plan, clear_rollback_patch()).await?;
            Action::await_change()
        }
        PlanStep::Rollback => rollback(&api, &plan, &ctx, inputs.retry_count).await?,
        PlanStep::Poll(action) => match resolve_chart(&ctx, &plan).await? {
            ChartSource::Waiting(reason) => wait_for_chart(&api, &plan, &ctx, reason).await?,
            ChartSource::Ready {
                chart,
                repository_uid,
            } => {
                let state = match ctx.pool.poll_install(&plan, &repository_uid, inputs.retry_count) {
                    Some(state) => Ok(state),
                    None => {
                        info!(
                            "No record of the {:?} job for {}, starting a fresh attempt",
                            action, resource_key
                        );
                        ctx.pool
                            .install_or_upgrade(&plan, &repository_uid, chart, inputs.retry_count)
                    }
                };
                fold_release_state(&api, &plan, &ctx, action, state, inputs.retry_count).await?
            }
        },
        PlanStep::Release(action) => match resolve_chart(&ctx, &plan).await? {
            ChartSource::Waiting(reason) => wait_for_chart(&api, &plan, &ctx, reason).await?,
            ChartSource::Ready {
                chart,
                repository_uid,
            } => {
                let state = ctx.pool.install_or_upgrade(
                    &plan,
                    &repository_uid,
                    chart,
                    inputs.retry_count,
                );
                fold_release_state(&api, &plan, &ctx, action, state, inputs.retry_count).await?
            }
        },
        PlanStep::Uninstall => uninstall(&api, &plan, &ctx).await?,
        PlanStep::RemoveFinalizer => {
            info!("🗑️  Release of {} uninstalled, removing finalizer", resource_key);
            remove_finalizer(&api, &plan).await?;
            Action::await_change()
        }
    };

    ctx.backoff.reset(&resource_key);
    observability::metrics::observe_reconciliation_duration(
        "componentplan",
        started.elapsed().as_secs_f64(),
    );
    Ok(action)
}

/// Render the preview, store it and observe the current generation
async fn render_manifest(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    ctx: &PlanContext,
) -> Result<Action> {
    let chart = match resolve_chart(ctx, plan).await? {
        ChartSource::Waiting(reason) => return wait_for_chart(api, plan, ctx, reason).await,
        ChartSource::Ready { chart, .. } => chart,
    };

    let manifest = match ctx.pool.get_manifests(plan, chart).await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!("Failed to render manifest of {}: {}", plan.name_any(), e);
            apply_status(
                api,
                plan,
                StatusUpdate::from_plan(plan).conditions([actioned_condition(
                    ConditionReason::WaitDo,
                    format!("failed to render manifest: {e}"),
                )]),
            )
            .await?;
            observability::metrics::increment_requeues_total("manifest-render");
            return Ok(Action::requeue(ctx.config.plan_transient_requeue()));
        }
    };

    store_manifest(&ctx.client, plan, &manifest).await?;
    let summary = summarize_manifest(&manifest);
    info!(
        "📄 Rendered manifest of {}: {} resource(s), {} image(s)",
        plan.name_any(),
        summary.resources.len(),
        summary.images.len()
    );

    // The counter reset must land before observedGeneration moves on
    let plan = if plan.generation_advanced() && has_retry_record(plan) {
        debug!("New generation of {}, resetting retry counter", plan.name_any());
        patch_metadata(api, plan, retry_count_patch(plan, None)).await?
    } else {
        plan.clone()
    };

    let mut update = StatusUpdate::from_plan(&plan)
        .manifest(summary)
        .observed_generation(plan.generation());
    if plan.generation_advanced() {
        update = update.conditions([actioned_condition(ConditionReason::WaitDo, "")]);
    }
    apply_status(api, &plan, update).await?;
    Ok(requeue_now())
}

/// Component, version or repository not available yet; not an error
async fn wait_for_chart(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    ctx: &PlanContext,
    reason: String,
) -> Result<Action> {
    info!("⏳ ComponentPlan {} waiting: {}", plan.name_any(), reason);
    apply_status(
        api,
        plan,
        StatusUpdate::from_plan(plan).conditions([actioned_condition(ConditionReason::WaitDo, reason)]),
    )
    .await?;
    observability::metrics::increment_requeues_total("waiting-for-component");
    Ok(Action::requeue(ctx.config.plan_wait_interval()))
}

async fn resolve_chart(ctx: &PlanContext, plan: &ComponentPlan) -> Result<ChartSource> {
    let component_ref = &plan.spec.component_ref;
    let component_namespace = component_ref.namespace_or(plan.namespace_or_default());
    let components: Api<Component> = Api::namespaced(ctx.client.clone(), component_namespace);
    let Some(component) = components.get_opt(&component_ref.name).await? else {
        return Ok(ChartSource::Waiting(format!(
            "component {}/{} not found",
            component_namespace, component_ref.name
        )));
    };
    let Some(repository_ref) = component.repository_ref() else {
        return Ok(ChartSource::Waiting(format!(
            "component {} has no repository yet",
            component_ref.name
        )));
    };
    if component.find_version(&plan.spec.install_version).is_none() {
        return Ok(ChartSource::Waiting(format!(
            "version {} not found in component {}",
            plan.spec.install_version, component_ref.name
        )));
    }

    let repository_namespace = repository_ref.namespace_or(component_namespace);
    let repositories: Api<Repository> = Api::namespaced(ctx.client.clone(), repository_namespace);
    let Some(repository) = repositories.get_opt(&repository_ref.name).await? else {
        return Ok(ChartSource::Waiting(format!(
            "repository {}/{} not found",
            repository_namespace, repository_ref.name
        )));
    };

    let auth = match repository.spec.auth_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => match ctx.credentials.load(repository_namespace, secret).await? {
            Some(auth) => Some(Arc::new(auth)),
            None => {
                return Ok(ChartSource::Waiting(format!(
                    "auth secret {repository_namespace}/{secret} not found"
                )))
            }
        },
        None => None,
    };

    Ok(ChartSource::Ready {
        chart: ChartRef {
            repo_url: repository.spec.url.trim().trim_end_matches('/').to_string(),
            chart: component.chart_name(),
            version: plan.spec.install_version.clone(),
            insecure: repository.spec.insecure,
            auth,
        },
        repository_uid: repository.uid().unwrap_or_default(),
    })
}

/// `Actioned=WaitDo` explaining why the pool refused a `kind` request
fn deferral_condition(kind: &str, e: &PoolError) -> Condition {
    actioned_condition(ConditionReason::WaitDo, format!("{kind} deferred: {e}"))
}

/// The pool refused the request; record why and poll again
async fn defer(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    ctx: &PlanContext,
    kind: &str,
    e: &PoolError,
) -> Result<Action> {
    debug!("{} of {} deferred: {}", kind, plan.name_any(), e);
    apply_status(
        api,
        plan,
        StatusUpdate::from_plan(plan).conditions([deferral_condition(kind, e)]),
    )
    .await?;
    observability::metrics::increment_requeues_total(&format!("{kind}-deferred"));
    Ok(Action::requeue(ctx.config.plan_poll_interval()))
}

/// Record the outcome of an install or upgrade job
async fn fold_release_state(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    ctx: &PlanContext,
    action: ReleaseAction,
    state: std::result::Result<JobState<Release>, PoolError>,
    retry: u32,
) -> Result<Action> {
    let update = StatusUpdate::from_plan(plan);
    match state {
        Err(e) => defer(api, plan, ctx, "release", &e).await,
        Ok(JobState::Started | JobState::Running) => {
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(action.in_progress(), "")]),
            )
            .await?;
            Ok(Action::requeue(ctx.config.plan_poll_interval()))
        }
        Ok(JobState::Succeeded(release)) => {
            info!(
                "✅ {:?} of {} succeeded at revision {}",
                action,
                plan.name_any(),
                release.revision
            );
            apply_status(
                api,
                plan,
                update
                    .conditions([actioned_condition(action.succeeded(), "")])
                    .installed_revision(release.revision),
            )
            .await?;
            spawn_latest_refresh(ctx.client.clone(), Arc::clone(&ctx.pool), plan);
            Ok(Action::await_change())
        }
        Ok(JobState::Failed(message)) => {
            error!(
                "❌ {:?} of {} failed (attempt {}): {}",
                action,
                plan.name_any(),
                retry + 1,
                message
            );
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(action.failed(), message)]),
            )
            .await?;
            record_failed_attempt(api, plan, retry).await?;
            Ok(Action::requeue(ctx.config.plan_transient_requeue()))
        }
    }
}

async fn rollback(
    api: &Api<ComponentPlan>,
    plan: &ComponentPlan,
    ctx: &PlanContext,
    retry: u32,
) -> Result<Action> {
    let update = StatusUpdate::from_plan(plan);
    match ctx.pool.rollback(plan) {
        Err(e) => defer(api, plan, ctx, "rollback", &e).await,
        Ok(JobState::Started | JobState::Running) => {
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(ConditionReason::RollingBack, "")]),
            )
            .await?;
            Ok(Action::requeue(ctx.config.plan_poll_interval()))
        }
        Ok(JobState::Succeeded(release)) => {
            info!(
                "⏪ Rolled back {} to revision {} (now revision {})",
                plan.name_any(),
                plan.installed_revision(),
                release.revision
            );
            apply_status(
                api,
                plan,
                update
                    .conditions([actioned_condition(ConditionReason::RollBackSuccess, "")])
                    .installed_revision(release.revision),
            )
            .await?;
            patch_metadata(api, plan, clear_rollback_patch()).await?;
            spawn_latest_refresh(ctx.client.clone(), Arc::clone(&ctx.pool), plan);
            Ok(Action::await_change())
        }
        Ok(JobState::Failed(message)) => {
            error!("❌ Rollback of {} failed: {}", plan.name_any(), message);
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(ConditionReason::RollBackFailed, message)]),
            )
            .await?;
            patch_metadata(api, plan, clear_rollback_patch()).await?;
            record_failed_attempt(api, plan, retry).await?;
            Ok(Action::requeue(ctx.config.plan_transient_requeue()))
        }
    }
}

async fn uninstall(api: &Api<ComponentPlan>, plan: &ComponentPlan, ctx: &PlanContext) -> Result<Action> {
    let update = StatusUpdate::from_plan(plan);
    match ctx.pool.uninstall(plan) {
        Err(e) => defer(api, plan, ctx, "uninstall", &e).await,
        Ok(JobState::Started | JobState::Running) => {
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(ConditionReason::Uninstalling, "")]),
            )
            .await?;
            Ok(Action::requeue(ctx.config.plan_poll_interval()))
        }
        Ok(JobState::Succeeded(())) => {
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(ConditionReason::UninstallSuccess, "")]),
            )
            .await?;
            spawn_latest_refresh(ctx.client.clone(), Arc::clone(&ctx.pool), plan);
            Ok(requeue_now())
        }
        Ok(JobState::Failed(message)) => {
            error!(
                "❌ Uninstall of {} failed, not retrying automatically: {}",
                plan.name_any(),
                message
            );
            apply_status(
                api,
                plan,
                update.conditions([actioned_condition(ConditionReason::UninstallFailed, message)]),
            )
            .await?;
            Ok(Action::await_change())
        }
    }
}

async fn record_failed_attempt(api: &Api<ComponentPlan>, plan: &ComponentPlan, retry: u32) -> Result<()> {
    observability::metrics::increment_plan_failures();
    patch_metadata(api, plan, retry_count_patch(plan, Some(retry + 1))).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;

    #[test]
    fn test_deferral_is_visible_as_wait_do() {
        let condition = deferral_condition(
            "uninstall",
            &PoolError::InstallInProgress("default/my-nginx".to_string()),
        );
        assert_eq!(condition.r#type, ConditionType::Actioned);
        assert_eq!(condition.reason, ConditionReason::WaitDo);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(
            condition.message,
            "uninstall deferred: install or upgrade of release default/my-nginx is in progress"
        );
    }
}
