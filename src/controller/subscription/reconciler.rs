//! # Subscription Reconciler
//!
//! Follows a Component and creates a ComponentPlan for each newer version it
//! publishes. Installation itself is left to the plan reconciler.

use super::registry::SubscriptionIndex;
use crate::config::SharedControllerConfig;
use crate::constants;
use crate::controller::backoff::BackoffRegistry;
use crate::controller::error::{ReconcilerError, Result};
use crate::crd::{
    Component, ComponentPlan, ComponentPlanSpec, Condition, ConditionReason, ConditionStatus,
    ConditionType, InstallMethod, InstalledRecord, NamespacedRef, Subscription,
};
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const MAX_OBJECT_NAME_LEN: usize = 253;

/// Shared state of the Subscription controller
pub struct SubscriptionContext {
    pub client: Client,
    pub index: Arc<SubscriptionIndex>,
    pub config: SharedControllerConfig,
    pub backoff: BackoffRegistry,
}

impl std::fmt::Debug for SubscriptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionContext")
            .field("subscriptions", &self.index.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[instrument(skip(subscription, ctx), fields(subscription = %subscription.name_any(), namespace = ?subscription.namespace()))]
pub async fn reconcile_subscription(
    subscription: Arc<Subscription>,
    ctx: Arc<SubscriptionContext>,
) -> Result<Action> {
    let started = std::time::Instant::now();
    crate::observability::metrics::increment_reconciliations("subscription");
    let namespace = subscription
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey)?;
    let api: Api<Subscription> = Api::namespaced(ctx.client.clone(), &namespace);

    let action = finalizer(&api, constants::FINALIZER, subscription, |event| async {
        match event {
            FinalizerEvent::Apply(subscription) => apply(&subscription, &api, &ctx).await,
            FinalizerEvent::Cleanup(subscription) => {
                ctx.index.remove(&subscription_key(&subscription));
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)))?;

    crate::observability::metrics::observe_reconciliation_duration(
        "subscription",
        started.elapsed().as_secs_f64(),
    );
    Ok(action)
}

async fn apply(
    subscription: &Subscription,
    api: &Api<Subscription>,
    ctx: &SubscriptionContext,
) -> Result<Action> {
    let (component_namespace, component_name) = subscription.component_key();
    ctx.index.add(
        (component_namespace.clone(), component_name.clone()),
        subscription_key(subscription),
    );
    let resync = Action::requeue(std::time::Duration::from_secs(
        ctx.config.subscription_resync_secs,
    ));

    let components: Api<Component> = Api::namespaced(ctx.client.clone(), &component_namespace);
    let Some(component) = components.get_opt(&component_name).await? else {
        record_synced(
            api,
            subscription,
            false,
            format!("component {component_namespace}/{component_name} not found"),
            None,
        )
        .await?;
        return Ok(resync);
    };

    let Some(version) = component.latest_version().map(|v| v.version.clone()) else {
        record_synced(api, subscription, false, "component has no installable version", None)
            .await?;
        return Ok(resync);
    };

    if !needs_plan(subscription, &version) {
        debug!("Subscription already follows version {}", version);
        record_synced(api, subscription, true, "", None).await?;
        ctx.backoff.reset(&key_string(subscription));
        return Ok(resync);
    }

    let plan = plan_for_subscription(subscription, &component_namespace, &version);
    let plan_name = plan.name_any();
    let plans: Api<ComponentPlan> = Api::namespaced(
        ctx.client.clone(),
        subscription.namespace().as_deref().unwrap_or("default"),
    );
    match plans.create(&PostParams::default(), &plan).await {
        Ok(_) => info!("➕ Created ComponentPlan {} for version {}", plan_name, version),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!("ComponentPlan {} already exists", plan_name);
        }
        Err(e) => return Err(e.into()),
    }

    let record = InstalledRecord {
        version: version.clone(),
        component_plan_ref: NamespacedRef::new(
            subscription.namespace().unwrap_or_default(),
            plan_name.clone(),
        ),
        installed_time: Some(chrono::Utc::now().to_rfc3339()),
    };
    record_synced(
        api,
        subscription,
        true,
        format!("created componentplan {plan_name} for version {version}"),
        Some(record),
    )
    .await?;
    ctx.backoff.reset(&key_string(subscription));
    Ok(resync)
}

fn subscription_key(subscription: &Subscription) -> (String, String) {
    (
        subscription.namespace().unwrap_or_default(),
        subscription.name_any(),
    )
}

fn key_string(subscription: &Subscription) -> String {
    let (namespace, name) = subscription_key(subscription);
    format!("{namespace}/{name}")
}

/// `version` has not been handed to a plan yet
pub fn needs_plan(subscription: &Subscription, version: &str) -> bool {
    subscription
        .installed()
        .last()
        .is_none_or(|record| record.version != version)
}

/// Plan name `<subscription>-<version>`, lowercased and limited to object-name characters
pub fn plan_name(subscription: &Subscription, version: &str) -> String {
    let raw = format!("{}-{}", subscription.name_any(), version).to_ascii_lowercase();
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_OBJECT_NAME_LEN)
        .collect();
    sanitized
        .trim_matches(|c: char| c == '-' || c == '.')
        .to_string()
}

/// ComponentPlan installing `version` on behalf of `subscription`
pub fn plan_for_subscription(
    subscription: &Subscription,
    component_namespace: &str,
    version: &str,
) -> ComponentPlan {
    let spec = &subscription.spec;
    ComponentPlan {
        metadata: ObjectMeta {
            name: Some(plan_name(subscription, version)),
            namespace: subscription.namespace(),
            labels: Some(BTreeMap::from([
                (
                    constants::SUBSCRIPTION_LABEL.to_string(),
                    subscription.name_any(),
                ),
                (constants::RELEASE_LABEL.to_string(), spec.name.clone()),
            ])),
            owner_references: subscription.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: ComponentPlanSpec {
            component_ref: NamespacedRef::new(component_namespace, spec.component_ref.name.clone()),
            install_version: version.to_string(),
            name: spec.name.clone(),
            approved: spec.component_plan_install_method == InstallMethod::Auto,
            override_values: spec.override_values.clone(),
            config: spec.config.clone(),
            creator: None,
        },
        status: None,
    }
}

/// Write the `Synced` condition and optionally append an installed record
async fn record_synced(
    api: &Api<Subscription>,
    subscription: &Subscription,
    synced: bool,
    message: impl Into<String>,
    record: Option<InstalledRecord>,
) -> Result<()> {
    let reason = if synced {
        ConditionReason::ReconcileSuccess
    } else {
        ConditionReason::ReconcileError
    };
    let condition = Condition::new(
        ConditionType::Synced,
        ConditionStatus::from(synced),
        reason,
        message,
    );
    let mut status = subscription.status.clone().unwrap_or_default();
    let before = status.conditions.clone();
    status.conditions.set_conditions([condition]);
    let conditions_changed = !before.equal(&status.conditions);
    if !conditions_changed && record.is_none() {
        return Ok(());
    }
    if !synced {
        warn!("Subscription {} not synced", subscription.name_any());
    }
    if let Some(record) = record {
        status.installed.push(record);
    }

    let patch = json!({
        "metadata": { "resourceVersion": subscription.resource_version() },
        "status": status,
    });
    match api
        .patch_status(
            &subscription.name_any(),
            &PatchParams::default(),
            &Patch::Merge(patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
