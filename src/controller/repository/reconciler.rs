//! # Repository Reconciler
//!
//! Keeps one poll loop per Repository and records URL changes. The sync itself
//! happens in the poll loop, not here.

use super::watcher::{watcher_key, RepositoryWatchers};
use crate::config::SharedControllerConfig;
use crate::constants;
use crate::controller::backoff::BackoffRegistry;
use crate::controller::error::{ReconcilerError, Result};
use crate::controller::validation::validate_repository;
use crate::crd::{
    update_cond_with_fixed_len, Condition, ConditionReason, ConditionStatus, ConditionType,
    Repository, RepositoryType,
};
use crate::observability;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Shared state of the Repository controller
pub struct RepositoryContext {
    pub client: Client,
    pub watchers: Arc<RepositoryWatchers>,
    pub config: SharedControllerConfig,
    pub backoff: BackoffRegistry,
}

impl std::fmt::Debug for RepositoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryContext")
            .field("watchers", &self.watchers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[instrument(skip(repository, ctx), fields(repository = %repository.name_any(), namespace = ?repository.namespace()))]
pub async fn reconcile_repository(
    repository: Arc<Repository>,
    ctx: Arc<RepositoryContext>,
) -> Result<Action> {
    let started = std::time::Instant::now();
    observability::metrics::increment_reconciliations("repository");
    let namespace = repository
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey)?;
    let api: Api<Repository> = Api::namespaced(ctx.client.clone(), &namespace);

    let action = finalizer(&api, constants::FINALIZER, repository, |event| async {
        match event {
            FinalizerEvent::Apply(repository) => apply(&repository, &api, &ctx).await,
            FinalizerEvent::Cleanup(repository) => cleanup(&repository, &ctx),
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)))?;

    observability::metrics::observe_reconciliation_duration(
        "repository",
        started.elapsed().as_secs_f64(),
    );
    Ok(action)
}

async fn apply(
    repository: &Repository,
    api: &Api<Repository>,
    ctx: &RepositoryContext,
) -> Result<Action> {
    let key = watcher_key(repository);
    let mut status = serde_json::Map::new();

    let condition = match validate_repository(repository) {
        Err(e) => {
            warn!("Repository {} is invalid: {}", key, e);
            ctx.watchers.remove(&key);
            Some(Condition::new(
                ConditionType::Synced,
                ConditionStatus::False,
                ConditionReason::ReconcileError,
                e.to_string(),
            ))
        }
        Ok(()) => {
            if let Some(history) = url_history_update(repository) {
                info!("Repository URL is now {}", repository.spec.url);
                status.insert("urlHistory".to_string(), json!(history));
            }
            if repository.spec.repository_type == RepositoryType::Oci {
                debug!("Repository {} is oci, not polling", key);
                ctx.watchers.remove(&key);
                Some(Condition::new(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    ConditionReason::Unavailable,
                    "oci repositories are not polled",
                ))
            } else {
                if ctx.watchers.add(repository) {
                    info!("✅ Watching repository {} ({})", key, repository.spec.url);
                }
                None
            }
        }
    };

    if let Some(log) = condition.and_then(|c| condition_log_update(repository, c)) {
        status.insert("conditions".to_string(), json!(log));
    }
    if !status.is_empty() {
        status.insert(
            "observedGeneration".to_string(),
            json!(repository.metadata.generation),
        );
        patch_status(api, repository, serde_json::Value::Object(status)).await?;
    }
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

fn cleanup(repository: &Repository, ctx: &RepositoryContext) -> Result<Action> {
    let key = watcher_key(repository);
    if ctx.watchers.remove(&key) {
        info!("🗑️  Repository {} deleted, watcher stopped", key);
    }
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

/// URL history with the current URL appended, when it differs from the last recorded one
pub fn url_history_update(repository: &Repository) -> Option<Vec<Condition>> {
    if repository.last_recorded_url() == Some(repository.spec.url.as_str()) {
        return None;
    }
    let history = repository
        .status
        .as_ref()
        .map(|s| s.url_history.as_slice())
        .unwrap_or_default();
    Some(update_cond_with_fixed_len(
        constants::URL_HISTORY_LEN,
        history,
        Condition::new(
            ConditionType::UrlChanged,
            ConditionStatus::True,
            ConditionReason::Unspecified,
            repository.spec.url.clone(),
        ),
    ))
}

/// Condition log with `condition` appended, unless the newest entry of its type says the same
pub fn condition_log_update(repository: &Repository, condition: Condition) -> Option<Vec<Condition>> {
    let status = repository.status.as_ref();
    if status
        .and_then(|s| s.latest(condition.r#type))
        .is_some_and(|latest| latest.same_as(&condition))
    {
        return None;
    }
    Some(update_cond_with_fixed_len(
        constants::REPOSITORY_CONDITION_LOG_LEN,
        status.map(|s| s.conditions.as_slice()).unwrap_or_default(),
        condition,
    ))
}

/// `resourceVersion`-guarded status merge patch; 404 is ignored, 409 surfaces for requeue
async fn patch_status(
    api: &Api<Repository>,
    repository: &Repository,
    status: serde_json::Value,
) -> Result<()> {
    let patch = json!({
        "metadata": { "resourceVersion": repository.resource_version() },
        "status": status,
    });
    match api
        .patch_status(
            &repository.name_any(),
            &PatchParams::default(),
            &Patch::Merge(patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(
                "Repository {} was deleted during reconciliation, skipping status update",
                repository.name_any()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{RepositorySpec, RepositoryStatus};

    fn repository(url: &str, history: &[&str]) -> Repository {
        let mut repo = Repository::new(
            "charts",
            RepositorySpec {
                url: url.to_string(),
                repository_type: RepositoryType::Http,
                auth_secret: None,
                insecure: false,
                pull_strategy: None,
                filter: vec![],
            },
        );
        repo.status = Some(RepositoryStatus {
            url_history: history
                .iter()
                .map(|u| {
                    Condition::new(
                        ConditionType::UrlChanged,
                        ConditionStatus::True,
                        ConditionReason::Unspecified,
                        *u,
                    )
                })
                .collect(),
            ..Default::default()
        });
        repo
    }

    #[test]
    fn test_url_history_only_on_change() {
        assert!(url_history_update(&repository("https://a", &["https://a"])).is_none());
        let history = url_history_update(&repository("https://b", &["https://a"])).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].message, "https://b");
    }

    #[test]
    fn test_url_history_is_bounded() {
        let old: Vec<String> = (0..constants::URL_HISTORY_LEN).map(|i| format!("https://{i}")).collect();
        let old: Vec<&str> = old.iter().map(String::as_str).collect();
        let history = url_history_update(&repository("https://new", &old)).unwrap();
        assert_eq!(history.len(), constants::URL_HISTORY_LEN);
        assert_eq!(history.last().map(|c| c.message.as_str()), Some("https://new"));
        assert_eq!(history[0].message, "https://1");
    }

    #[test]
    fn test_condition_log_skips_repeats() {
        let repo = repository("https://a", &[]);
        let ready = Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Unavailable,
            "oci repositories are not polled",
        );
        let log = condition_log_update(&repo, ready.clone()).unwrap();
        let mut repo = repo;
        repo.status.as_mut().unwrap().conditions = log;
        assert!(condition_log_update(&repo, ready).is_none());
    }
}
