//! # Repository Sync
//!
//! One pass of the diff engine: fetch the index, filter it, diff it against the
//! recorded Components, apply the delta and log the outcome on the Repository.

use super::auth::CredentialSource;
use super::diff::{build_target_components, component_version_diff, diff_components};
use super::fetcher::{FetchError, FetchOptions, IndexFetcher};
use super::filter::{CompiledFilters, FilterError};
use super::store::{ComponentStore, StoreError};
use crate::crd::{Component, Condition, ConditionReason, ConditionStatus, ConditionType, Repository};
use crate::observability;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("auth secret {0} not found")]
    MissingSecret(String),
    #[error("failed to read auth secret: {0}")]
    Secret(#[source] kube::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Some Component writes failed; the others were applied
    #[error("{failed} component write(s) failed, first: {first}")]
    Apply {
        failed: usize,
        first: StoreError,
        applied: SyncSummary,
    },
}

impl SyncError {
    /// The repository itself could not be reached or read
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch(_) | SyncError::MissingSecret(_) | SyncError::Secret(_)
        )
    }
}

/// Counts of the writes applied by one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deprecated: usize,
}

/// Write failures of one apply pass; every entry is attempted regardless
#[derive(Debug, Default)]
struct ApplyFailures {
    failed: usize,
    first: Option<StoreError>,
}

impl ApplyFailures {
    /// `true` when the write went through
    fn check(&mut self, component: &Component, result: Result<(), StoreError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️  Failed to write component {}: {}", component.name_any(), e);
                self.failed += 1;
                self.first.get_or_insert(e);
                false
            }
        }
    }

    fn into_result(self, applied: SyncSummary) -> Result<SyncSummary, SyncError> {
        match self.first {
            None => Ok(applied),
            Some(first) => Err(SyncError::Apply {
                failed: self.failed,
                first,
                applied,
            }),
        }
    }
}

/// Runs sync passes for any Repository
pub struct RepositorySyncer {
    store: Arc<dyn ComponentStore>,
    credentials: Arc<dyn CredentialSource>,
    retry_backoff: Duration,
}

impl std::fmt::Debug for RepositorySyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySyncer")
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

impl RepositorySyncer {
    pub fn new(
        store: Arc<dyn ComponentStore>,
        credentials: Arc<dyn CredentialSource>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            credentials,
            retry_backoff,
        }
    }

    async fn fetcher_for(&self, repository: &Repository) -> Result<IndexFetcher, SyncError> {
        let strategy = repository.pull_strategy();
        let options = FetchOptions {
            timeout: strategy.timeout(),
            retry: strategy.retry,
            retry_backoff: self.retry_backoff,
            insecure: repository.spec.insecure,
        };
        let auth = match repository.spec.auth_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => {
                let namespace = repository.namespace().unwrap_or_default();
                let auth = self
                    .credentials
                    .load(&namespace, secret)
                    .await
                    .map_err(SyncError::Secret)?
                    .ok_or_else(|| SyncError::MissingSecret(format!("{namespace}/{secret}")))?;
                Some(auth)
            }
            None => None,
        };
        Ok(IndexFetcher::new(options, auth.as_ref())?)
    }

    /// Fetch, filter, diff and apply without recording conditions
    pub async fn sync_once(&self, repository: &Repository) -> Result<SyncSummary, SyncError> {
        let fetcher = self.fetcher_for(repository).await?;
        let index = fetcher.fetch_index(&repository.index_url()).await?;
        let filters = CompiledFilters::compile(&repository.spec.filter)?;
        let targets = build_target_components(repository, &index, &filters);
        let existing = self.store.list_components(repository).await?;
        let diff = diff_components(&existing, targets);

        if diff.is_empty() {
            debug!("Repository index unchanged ({} components)", existing.len());
            return Ok(SyncSummary::default());
        }

        let mut summary = SyncSummary::default();
        let mut failures = ApplyFailures::default();
        for component in &diff.create {
            info!(
                "➕ Creating component {} with {} version(s)",
                component.name_any(),
                component.versions().len()
            );
            if failures.check(component, self.store.create_component(component).await) {
                summary.created += 1;
            }
        }
        for component in &diff.update {
            if let Some(previous) = existing
                .iter()
                .find(|c| c.name_any() == component.name_any())
            {
                let versions = component_version_diff(previous.versions(), component.versions());
                info!(
                    "🔄 Updating component {}: added {:?}, deleted {:?}, deprecated {:?}",
                    component.name_any(),
                    versions.added,
                    versions.deleted,
                    versions.deprecated
                );
            }
            if failures.check(component, self.store.replace_component_status(component).await) {
                summary.updated += 1;
            }
        }
        for component in &diff.deprecate {
            info!("🗑️  Component {} left the index, marking deprecated", component.name_any());
            if failures.check(component, self.store.replace_component_status(component).await) {
                summary.deprecated += 1;
            }
        }
        failures.into_result(summary)
    }

    /// Run one sync and append `Ready`/`Synced` to the Repository's condition log
    pub async fn sync_and_record(&self, repository: &Repository) -> Result<SyncSummary, SyncError> {
        let span = tracing::info_span!(
            "repository.sync",
            repository.name = %repository.name_any(),
            repository.namespace = %repository.namespace().unwrap_or_default()
        );
        async {
            let started = std::time::Instant::now();
            let result = self.sync_once(repository).await;
            let elapsed = started.elapsed().as_secs_f64();

            let conditions = match &result {
                Ok(summary) => {
                    observability::metrics::observe_repository_sync("success", elapsed);
                    observability::metrics::increment_components_changed(
                        summary.created,
                        summary.updated,
                        summary.deprecated,
                    );
                    vec![
                        Condition::new(
                            ConditionType::Ready,
                            ConditionStatus::True,
                            ConditionReason::Available,
                            "",
                        ),
                        Condition::new(
                            ConditionType::Synced,
                            ConditionStatus::True,
                            ConditionReason::ReconcileSuccess,
                            format!(
                                "created {}, updated {}, deprecated {}",
                                summary.created, summary.updated, summary.deprecated
                            ),
                        ),
                    ]
                }
                Err(e) => {
                    error!("❌ Repository sync failed: {}", e);
                    observability::metrics::observe_repository_sync("failure", elapsed);
                    let ready = if e.is_unavailable() {
                        Condition::new(
                            ConditionType::Ready,
                            ConditionStatus::False,
                            ConditionReason::Unavailable,
                            e.to_string(),
                        )
                    } else {
                        Condition::new(
                            ConditionType::Ready,
                            ConditionStatus::True,
                            ConditionReason::Available,
                            "",
                        )
                    };
                    vec![
                        ready,
                        Condition::new(
                            ConditionType::Synced,
                            ConditionStatus::False,
                            ConditionReason::ReconcileError,
                            e.to_string(),
                        ),
                    ]
                }
            };

            if let Err(e) = self
                .store
                .record_repository_conditions(repository, conditions)
                .await
            {
                error!("Failed to record repository conditions: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }
}
