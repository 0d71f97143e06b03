//! # Component Store
//!
//! Persistence seam of the repository sync loop. The cluster implementation writes
//! Components and Repository status with `resourceVersion`-guarded merge patches.

use crate::constants;
use crate::crd::{update_cond_with_fixed_len, Component, Condition, Repository};
use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: &'static str, name: String },
}

/// Writes performed by the repository sync loop
#[async_trait]
pub trait ComponentStore: Send + Sync {
    /// Components labelled as owned by `repository`
    async fn list_components(&self, repository: &Repository) -> Result<Vec<Component>, StoreError>;

    async fn create_component(&self, component: &Component) -> Result<(), StoreError>;

    /// Replace the status of an existing Component
    async fn replace_component_status(&self, component: &Component) -> Result<(), StoreError>;

    /// Append `conditions` to the Repository's fixed-length condition log
    async fn record_repository_conditions(
        &self,
        repository: &Repository,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError>;
}

/// Cluster-backed store
#[derive(Clone)]
pub struct KubeComponentStore {
    client: Client,
}

impl std::fmt::Debug for KubeComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeComponentStore").finish_non_exhaustive()
    }
}

impl KubeComponentStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

const MAX_CONFLICT_RETRIES: usize = 3;

#[async_trait]
impl ComponentStore for KubeComponentStore {
    async fn list_components(&self, repository: &Repository) -> Result<Vec<Component>, StoreError> {
        let namespace = repository.namespace().unwrap_or_default();
        let api: Api<Component> = Api::namespaced(self.client.clone(), &namespace);
        let selector = format!(
            "{}={}",
            constants::COMPONENT_REPOSITORY_LABEL,
            repository.name_any()
        );
        let list = api.list(&ListParams::default().labels(&selector)).await?;
        Ok(list.items)
    }

    async fn create_component(&self, component: &Component) -> Result<(), StoreError> {
        let namespace = component.namespace().unwrap_or_default();
        let api: Api<Component> = Api::namespaced(self.client.clone(), &namespace);
        let created = match api.create(&PostParams::default(), component).await {
            Ok(created) => created,
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Component {} already exists, updating status instead", component.name_any());
                api.get(&component.name_any()).await?
            }
            Err(e) => return Err(e.into()),
        };
        // Status is a subresource; creation ignores it
        let mut with_status = created;
        with_status.status.clone_from(&component.status);
        self.replace_component_status(&with_status).await
    }

    async fn replace_component_status(&self, component: &Component) -> Result<(), StoreError> {
        let namespace = component.namespace().unwrap_or_default();
        let api: Api<Component> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "metadata": { "resourceVersion": component.resource_version() },
            "status": component.status,
        });
        match api
            .patch_status(
                &component.name_any(),
                &PatchParams::default(),
                &Patch::Merge(patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(StoreError::Conflict {
                kind: "Component",
                name: component.name_any(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_repository_conditions(
        &self,
        repository: &Repository,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError> {
        let namespace = repository.namespace().unwrap_or_default();
        let name = repository.name_any();
        let api: Api<Repository> = Api::namespaced(self.client.clone(), &namespace);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(current) = api.get_opt(&name).await? else {
                debug!("Repository {}/{} is gone, dropping conditions", namespace, name);
                return Ok(());
            };
            let mut log = current
                .status
                .as_ref()
                .map(|s| s.conditions.clone())
                .unwrap_or_default();
            for condition in &conditions {
                log = update_cond_with_fixed_len(
                    constants::REPOSITORY_CONDITION_LOG_LEN,
                    &log,
                    condition.clone(),
                );
            }
            let patch = json!({
                "metadata": { "resourceVersion": current.resource_version() },
                "status": { "conditions": log },
            });
            match api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
                .await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    debug!("Repository {}/{} changed while recording conditions, retrying", namespace, name);
                }
                Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict {
            kind: "Repository",
            name,
        })
    }
}
