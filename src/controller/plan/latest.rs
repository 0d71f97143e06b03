//! # Latest Plan
//!
//! Plans sharing a release name are siblings. After a release action finishes, a
//! background task marks the sibling that produced the deployed revision as
//! `latest` and clears the flag on all others.

use super::status::{apply_status, StatusUpdate};
use crate::constants;
use crate::controller::annotations::release_owned_by;
use crate::controller::release::{Release, ReleaseKey, ReleaseWorkerPool};
use crate::crd::ComponentPlan;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

/// `(plan name, latest)` for every sibling whose flag must change
pub fn compute_latest(siblings: &[ComponentPlan], deployed: Option<&Release>) -> Vec<(String, bool)> {
    let owner = deployed.and_then(|release| {
        siblings
            .iter()
            .filter(|plan| plan.installed_revision() > 0)
            .find(|plan| release_owned_by(plan, &release.description, release.revision))
            .map(ResourceExt::name_any)
    });
    siblings
        .iter()
        .filter_map(|plan| {
            let latest = owner.as_deref() == Some(plan.name_any().as_str());
            let current = plan.status.as_ref().and_then(|s| s.latest);
            (current != Some(latest)).then(|| (plan.name_any(), latest))
        })
        .collect()
}

/// Recompute `latest` across the siblings of `plan` without blocking the caller
pub fn spawn_latest_refresh(client: Client, pool: Arc<ReleaseWorkerPool>, plan: &ComponentPlan) {
    let namespace = plan.namespace_or_default().to_string();
    let release = plan.spec.name.clone();
    let span = tracing::info_span!("plan.latest", namespace = %namespace, release = %release);
    tokio::spawn(
        async move {
            if let Err(e) = refresh_latest(&client, &pool, &namespace, &release).await {
                warn!("Failed to refresh latest plan: {}", e);
            }
        }
        .instrument(span),
    );
}

async fn refresh_latest(
    client: &Client,
    pool: &ReleaseWorkerPool,
    namespace: &str,
    release: &str,
) -> crate::controller::error::Result<()> {
    let api: Api<ComponentPlan> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{}={}", constants::RELEASE_LABEL, release);
    let siblings = api.list(&ListParams::default().labels(&selector)).await?.items;
    let deployed = pool.last_release(&ReleaseKey::new(namespace, release)).await?;

    for (name, latest) in compute_latest(&siblings, deployed.as_ref()) {
        let Some(plan) = siblings.iter().find(|p| p.name_any() == name) else {
            continue;
        };
        debug!("Setting latest={} on plan {}", latest, name);
        if let Err(e) = apply_status(&api, plan, StatusUpdate::from_plan(plan).latest(latest)).await {
            warn!("Failed to set latest on plan {}: {}", name, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::annotations::ReleaseIdentity;
    use crate::controller::release::ReleaseStatus;
    use crate::crd::{ComponentPlanSpec, ComponentPlanStatus, NamespacedRef};

    fn plan(name: &str, uid: &str, revision: i32, latest: Option<bool>) -> ComponentPlan {
        let mut plan = ComponentPlan::new(
            name,
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
        plan.metadata.namespace = Some("default".to_string());
        plan.metadata.uid = Some(uid.to_string());
        plan.metadata.generation = Some(1);
        plan.status = Some(ComponentPlanStatus {
            installed_revision: revision,
            latest,
            ..Default::default()
        });
        plan
    }

    fn release_by(plan: &ComponentPlan, revision: i32) -> Release {
        Release {
            name: "my-nginx".to_string(),
            namespace: "default".to_string(),
            revision,
            status: ReleaseStatus::Deployed,
            description: ReleaseIdentity::from_plan(plan).to_string(),
            chart_version: "1.0.0".to_string(),
            app_version: String::new(),
        }
    }

    #[test]
    fn test_owner_of_deployed_revision_is_latest() {
        let old = plan("nginx-1", "uid-1", 1, Some(true));
        let new = plan("nginx-2", "uid-2", 2, None);
        let release = release_by(&new, 2);

        let changes = compute_latest(&[old, new], Some(&release));
        assert_eq!(
            changes,
            vec![("nginx-1".to_string(), false), ("nginx-2".to_string(), true)]
        );
    }

    #[test]
    fn test_unchanged_flags_are_skipped() {
        let old = plan("nginx-1", "uid-1", 1, Some(false));
        let new = plan("nginx-2", "uid-2", 2, Some(true));
        let release = release_by(&new, 2);
        assert!(compute_latest(&[old, new], Some(&release)).is_empty());
    }

    #[test]
    fn test_no_release_clears_every_flag() {
        let only = plan("nginx-1", "uid-1", 1, Some(true));
        assert_eq!(
            compute_latest(&[only], None),
            vec![("nginx-1".to_string(), false)]
        );
    }
}
