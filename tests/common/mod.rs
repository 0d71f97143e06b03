//! Shared fixtures for integration tests: an in-memory package manager, an
//! in-memory component store and object builders.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use component_controller::controller::annotations::ReleaseIdentity;
use component_controller::controller::release::{
    ChartRef, PackageManager, Release, ReleaseError, ReleaseFailureReason, ReleaseKey,
    ReleaseRequest, ReleaseStatus,
};
use component_controller::controller::repository::{
    ComponentStore, CredentialSource, RepositoryAuth, StoreError,
};
use component_controller::crd::{
    Component, ComponentPlan, ComponentPlanSpec, Condition, NamespacedRef, ReleaseConfig,
    Repository, RepositorySpec,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const NAMESPACE: &str = "default";

/// Package manager whose install/upgrade blocks until permits are released
#[derive(Debug)]
pub struct FakePackageManager {
    gate: Semaphore,
    pub installs: AtomicUsize,
    pub uninstalls: AtomicUsize,
    pub rollbacks: AtomicUsize,
    releases: Mutex<HashMap<ReleaseKey, Release>>,
    fail_installs: bool,
}

impl FakePackageManager {
    /// Install/upgrade completes immediately
    pub fn open() -> Self {
        Self::with_gate(Semaphore::MAX_PERMITS)
    }

    /// Install/upgrade waits for [`FakePackageManager::release_one`]
    pub fn gated() -> Self {
        Self::with_gate(0)
    }

    pub fn failing() -> Self {
        Self {
            fail_installs: true,
            ..Self::open()
        }
    }

    fn with_gate(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            installs: AtomicUsize::new(0),
            uninstalls: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            releases: Mutex::new(HashMap::new()),
            fail_installs: false,
        }
    }

    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }

    /// Pretend a release already exists with the given description
    pub fn seed_release(&self, key: ReleaseKey, revision: i32, description: impl Into<String>) {
        let release = Release {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            revision,
            status: ReleaseStatus::Deployed,
            description: description.into(),
            chart_version: "1.0.0".to_string(),
            app_version: String::new(),
        };
        self.releases.lock().unwrap().insert(key, release);
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn template(&self, request: &ReleaseRequest) -> Result<String, ReleaseError> {
        Ok(format!(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n",
            request.key.name
        ))
    }

    async fn install_or_upgrade(&self, request: &ReleaseRequest) -> Result<Release, ReleaseError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.map_err(|e| {
            ReleaseError::new("install", &request.key, ReleaseFailureReason::Io, e.to_string())
        })?;
        permit.forget();
        if self.fail_installs {
            return Err(ReleaseError::new(
                "install",
                &request.key,
                ReleaseFailureReason::ActionFailed,
                "chart hook failed",
            ));
        }
        let mut releases = self.releases.lock().unwrap();
        let revision = releases.get(&request.key).map_or(1, |r| r.revision + 1);
        let release = Release {
            name: request.key.name.clone(),
            namespace: request.key.namespace.clone(),
            revision,
            status: ReleaseStatus::Deployed,
            description: request.description.clone(),
            chart_version: request.chart.version.clone(),
            app_version: String::new(),
        };
        releases.insert(request.key.clone(), release.clone());
        Ok(release)
    }

    async fn uninstall(&self, key: &ReleaseKey) -> Result<(), ReleaseError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        self.releases.lock().unwrap().remove(key);
        Ok(())
    }

    async fn rollback(
        &self,
        key: &ReleaseKey,
        revision: i32,
        _config: &ReleaseConfig,
    ) -> Result<Release, ReleaseError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        let mut releases = self.releases.lock().unwrap();
        let current = releases.get(key).cloned().ok_or_else(|| {
            ReleaseError::new("rollback", key, ReleaseFailureReason::ReleaseNotFound, "not found")
        })?;
        let release = Release {
            revision: current.revision + 1,
            description: format!("Rollback to {revision}"),
            ..current
        };
        releases.insert(key.clone(), release.clone());
        Ok(release)
    }

    async fn last_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ReleaseError> {
        Ok(self.releases.lock().unwrap().get(key).cloned())
    }
}

/// In-memory Component storage keyed by name
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub components: Mutex<BTreeMap<String, Component>>,
    pub conditions: Mutex<Vec<Condition>>,
    /// Component names whose writes fail with a conflict
    pub rejected: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn reject_writes_to(&self, name: &str) {
        self.rejected.lock().unwrap().insert(name.to_string());
    }

    fn check_write(&self, component: &Component) -> Result<(), StoreError> {
        if self.rejected.lock().unwrap().contains(&component.name_any()) {
            return Err(StoreError::Conflict {
                kind: "Component",
                name: component.name_any(),
            });
        }
        Ok(())
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        self.components.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.lock().unwrap().len()
    }
}

#[async_trait]
impl ComponentStore for MemoryStore {
    async fn list_components(&self, repository: &Repository) -> Result<Vec<Component>, StoreError> {
        let prefix = format!("{}.", repository.name_any());
        Ok(self
            .components
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.name_any().starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn create_component(&self, component: &Component) -> Result<(), StoreError> {
        self.check_write(component)?;
        self.components
            .lock()
            .unwrap()
            .insert(component.name_any(), component.clone());
        Ok(())
    }

    async fn replace_component_status(&self, component: &Component) -> Result<(), StoreError> {
        self.check_write(component)?;
        let mut components = self.components.lock().unwrap();
        if let Some(existing) = components.get_mut(&component.name_any()) {
            existing.status = component.status.clone();
        }
        Ok(())
    }

    async fn record_repository_conditions(
        &self,
        _repository: &Repository,
        conditions: Vec<Condition>,
    ) -> Result<(), StoreError> {
        self.conditions.lock().unwrap().extend(conditions);
        Ok(())
    }
}

/// No repository needs credentials
#[derive(Debug, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialSource for NoCredentials {
    async fn load(&self, _namespace: &str, _name: &str) -> Result<Option<RepositoryAuth>, kube::Error> {
        Ok(None)
    }
}

pub fn repository(name: &str, url: &str) -> Repository {
    let mut repository = Repository::new(
        name,
        RepositorySpec {
            url: url.to_string(),
            repository_type: Default::default(),
            auth_secret: None,
            insecure: false,
            pull_strategy: None,
            filter: Vec::new(),
        },
    );
    repository.metadata.namespace = Some(NAMESPACE.to_string());
    repository.metadata.uid = Some(format!("{name}-uid"));
    repository.metadata.generation = Some(1);
    repository
}

pub fn plan(name: &str, uid: &str, generation: i64) -> ComponentPlan {
    let mut plan = ComponentPlan::new(
        name,
        ComponentPlanSpec {
            component_ref: NamespacedRef::new(NAMESPACE, "bitnami.nginx"),
            install_version: "1.0.0".to_string(),
            name: "my-nginx".to_string(),
            approved: true,
            override_values: Default::default(),
            config: Default::default(),
            creator: None,
        },
    );
    plan.metadata.namespace = Some(NAMESPACE.to_string());
    plan.metadata.uid = Some(uid.to_string());
    plan.metadata.generation = Some(generation);
    plan
}

pub fn chart() -> ChartRef {
    ChartRef {
        repo_url: "http://charts.example.com".to_string(),
        chart: "nginx".to_string(),
        version: "1.0.0".to_string(),
        insecure: false,
        auth: None,
    }
}

pub fn identity_of(plan: &ComponentPlan) -> String {
    ReleaseIdentity::from_plan(plan).to_string()
}

/// Poll `check` until it returns `Some`, yielding to spawned tasks in between
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    for _ in 0..500 {
        if let Some(value) = check() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
