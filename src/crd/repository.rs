//! # Repository
//!
//! A remote chart repository the controller polls for available component versions.

use crate::constants;
use crate::crd::condition::{Condition, ConditionType};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Repository Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: core.kubebb.k8s.com.cn/v1alpha1
/// kind: Repository
/// metadata:
///   name: kubebb
///   namespace: kubebb-system
/// spec:
///   url: https://kubebb.github.io/components
///   pullStategy:
///     intervalSeconds: 120
///     timeoutSeconds: 10
///     retry: 5
///   filter:
///     - name: minio
///       operation: keep
///       versionedFilterCond:
///         versionConstraint: ">= 2.0.0"
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Repository",
    group = "core.kubebb.k8s.com.cn",
    version = "v1alpha1",
    namespaced,
    status = "RepositoryStatus",
    shortname = "repo",
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".spec.url"}, {"name":"Type", "type":"string", "jsonPath":".spec.repositoryType"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// Base URL of the chart repository; `index.yaml` is fetched relative to it
    pub url: String,
    /// Repository flavour. Only `http` repositories are polled.
    #[serde(default)]
    pub repository_type: RepositoryType,
    /// Name of a Secret in the repository namespace holding
    /// `username`, `password`, `cadata`, `certdata` and `keydata`
    #[serde(default)]
    pub auth_secret: Option<String>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// Polling cadence, request timeout and retry budget
    #[serde(default, rename = "pullStategy")]
    pub pull_strategy: Option<PullStrategy>,
    /// Per-package keep/ignore rules
    #[serde(default)]
    pub filter: Vec<FilterCond>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Http,
    Oci,
}

/// How often and how hard to pull the repository index
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullStrategy {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry")]
    pub retry: u32,
}

impl Default for PullStrategy {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            timeout_seconds: default_timeout_seconds(),
            retry: default_retry(),
        }
    }
}

impl PullStrategy {
    /// Poll interval with the configured floor applied
    pub fn interval(&self, min_interval_seconds: u64) -> Duration {
        Duration::from_secs(self.interval_seconds.max(min_interval_seconds))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

fn default_interval_seconds() -> u64 {
    constants::DEFAULT_PULL_INTERVAL_SECS
}

fn default_timeout_seconds() -> u64 {
    constants::DEFAULT_PULL_TIMEOUT_SECS
}

fn default_retry() -> u32 {
    constants::DEFAULT_PULL_RETRY
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[default]
    Keep,
    Ignore,
}

/// Filter rule for one package name
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterCond {
    /// Exact package name the rule applies to
    pub name: String,
    #[serde(default)]
    pub operation: FilterOp,
    /// Keep versions the index marks as deprecated
    #[serde(default)]
    pub keep_deprecated: bool,
    #[serde(default)]
    pub versioned_filter_cond: Option<VersionedFilterCond>,
}

/// Version predicates of a kept package; every non-empty predicate must pass
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionedFilterCond {
    /// Explicit allow-list of versions
    #[serde(default)]
    pub versions: Vec<String>,
    /// Regular expression the version must match
    #[serde(default)]
    pub regexp: Option<String>,
    /// Semantic version range, e.g. `>= 2.0.0, < 3`
    #[serde(default)]
    pub version_constraint: Option<String>,
}

/// Status of the Repository resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// Recent availability and sync facts, oldest first
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Recent URLs the repository pointed at, oldest first
    #[serde(default)]
    pub url_history: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl RepositoryStatus {
    /// Newest recorded condition of the given type
    pub fn latest(&self, r#type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().rev().find(|c| c.r#type == r#type)
    }
}

impl Repository {
    pub fn pull_strategy(&self) -> PullStrategy {
        self.spec.pull_strategy.clone().unwrap_or_default()
    }

    /// URL of the repository index document
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.spec.url.trim_end_matches('/'))
    }

    /// Name of the Component recorded for `chart` in this repository
    pub fn component_name(&self, chart: &str) -> String {
        format!(
            "{}.{}",
            self.metadata.name.as_deref().unwrap_or_default(),
            chart
        )
    }

    /// URL most recently recorded in the URL history
    pub fn last_recorded_url(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.url_history.last())
            .map(|c| c.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_strategy_defaults_from_partial_spec() {
        let strategy: PullStrategy = serde_json::from_str(r#"{"intervalSeconds": 30}"#).unwrap();
        assert_eq!(strategy.interval_seconds, 30);
        assert_eq!(strategy.timeout_seconds, constants::DEFAULT_PULL_TIMEOUT_SECS);
        assert_eq!(strategy.retry, constants::DEFAULT_PULL_RETRY);
        assert_eq!(strategy.interval(120), Duration::from_secs(120));
    }

    #[test]
    fn test_index_url_trims_slash() {
        let repo = Repository::new(
            "charts",
            RepositorySpec {
                url: "https://charts.example.com/stable/".to_string(),
                repository_type: RepositoryType::Http,
                auth_secret: None,
                insecure: false,
                pull_strategy: None,
                filter: vec![],
            },
        );
        assert_eq!(repo.index_url(), "https://charts.example.com/stable/index.yaml");
        assert_eq!(repo.component_name("nginx"), "charts.nginx");
    }

    #[test]
    fn test_spec_wire_names() {
        let spec: RepositorySpec = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "pullStategy": {"intervalSeconds": 300},
            "filter": [{"name": "minio", "operation": "ignore"}]
        }))
        .unwrap();
        assert_eq!(spec.pull_strategy.unwrap().interval_seconds, 300);
        assert_eq!(spec.filter[0].operation, FilterOp::Ignore);
    }
}
