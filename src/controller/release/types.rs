//! # Release Types
//!
//! Values exchanged between the plan reconciler, the worker pool and the package manager.

use crate::controller::repository::RepositoryAuth;
use crate::crd::{ComponentPlan, Override, ReleaseConfig};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// A release is identified by its namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Release targeted by a plan: plan namespace + `spec.name`
    pub fn for_plan(plan: &ComponentPlan) -> Self {
        Self::new(plan.namespace_or_default(), plan.spec.name.clone())
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Status of a deployed release as reported by the package manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Unknown,
}

impl ReleaseStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "deployed" => ReleaseStatus::Deployed,
            "failed" => ReleaseStatus::Failed,
            "superseded" => ReleaseStatus::Superseded,
            "uninstalled" => ReleaseStatus::Uninstalled,
            "uninstalling" => ReleaseStatus::Uninstalling,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            _ => ReleaseStatus::Unknown,
        }
    }
}

/// Snapshot of a release revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: i32,
    pub status: ReleaseStatus,
    pub description: String,
    pub chart_version: String,
    pub app_version: String,
}

/// Where the chart of a release comes from
#[derive(Debug, Clone)]
pub struct ChartRef {
    /// Base URL of the repository
    pub repo_url: String,
    /// Package name in the repository index
    pub chart: String,
    pub version: String,
    /// Skip TLS verification when pulling the chart
    pub insecure: bool,
    /// Credentials from the repository auth Secret
    pub auth: Option<Arc<RepositoryAuth>>,
}

/// Everything the package manager needs for one action
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub key: ReleaseKey,
    pub chart: ChartRef,
    pub override_values: Override,
    pub config: ReleaseConfig,
    /// Written as the release description; encodes the plan identity
    pub description: String,
}

impl ReleaseRequest {
    /// Request for `plan` with its overrides and options
    pub fn for_plan(plan: &ComponentPlan, chart: ChartRef) -> Self {
        Self {
            key: ReleaseKey::for_plan(plan),
            chart,
            override_values: plan.spec.override_values.clone(),
            config: plan.spec.config.clone(),
            description: crate::controller::annotations::ReleaseIdentity::from_plan(plan)
                .to_string(),
        }
    }
}

/// Outcome of a job as seen by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState<T> {
    /// The call started a new job
    Started,
    /// A job for the same identity is still in flight
    Running,
    Succeeded(T),
    Failed(String),
}

impl<T> JobState<T> {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded(_) | JobState::Failed(_))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobState::Started | JobState::Running)
    }
}

/// Class of a job; one job per class may run for a release key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobClass {
    InstallOrUpgrade,
    Uninstall,
    Rollback,
}

impl JobClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobClass::InstallOrUpgrade => "install_or_upgrade",
            JobClass::Uninstall => "uninstall",
            JobClass::Rollback => "rollback",
        }
    }
}

/// Raw release entry from `helm ... -o json`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HelmReleaseJson {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub info: HelmReleaseInfo,
    #[serde(default)]
    pub chart: Option<HelmChartJson>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HelmReleaseInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HelmChartJson {
    #[serde(default)]
    pub metadata: HelmChartMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelmChartMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub app_version: String,
}

impl From<HelmReleaseJson> for Release {
    fn from(raw: HelmReleaseJson) -> Self {
        let metadata = raw.chart.map(|c| c.metadata).unwrap_or_default();
        Release {
            name: raw.name,
            namespace: raw.namespace,
            revision: raw.version,
            status: ReleaseStatus::parse(&raw.info.status),
            description: raw.info.description,
            chart_version: metadata.version,
            app_version: metadata.app_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_from_helm_json() {
        let raw: HelmReleaseJson = serde_json::from_str(
            r#"{
                "name": "nginx",
                "namespace": "default",
                "version": 3,
                "info": {"status": "deployed", "description": "default/nginx-1/uid/2"},
                "chart": {"metadata": {"version": "15.0.2", "appVersion": "1.25.0"}}
            }"#,
        )
        .unwrap();
        let release = Release::from(raw);
        assert_eq!(release.revision, 3);
        assert_eq!(release.status, ReleaseStatus::Deployed);
        assert_eq!(release.chart_version, "15.0.2");
        assert_eq!(release.description, "default/nginx-1/uid/2");
    }

    #[test]
    fn test_unknown_status() {
        assert_eq!(ReleaseStatus::parse("pending-upgrade"), ReleaseStatus::PendingUpgrade);
        assert_eq!(ReleaseStatus::parse("weird"), ReleaseStatus::Unknown);
    }
}
