//! # ComponentPlan
//!
//! One desired Helm release of a Component version. The plan reconciler renders a
//! manifest preview, waits for approval and drives the release through the worker pool.

use crate::crd::condition::{ConditionReason, ConditionType, ConditionedStatus};
use crate::crd::NamespacedRef;
use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

/// ComponentPlan Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: core.kubebb.k8s.com.cn/v1alpha1
/// kind: ComponentPlan
/// metadata:
///   name: nginx-15-0-2
///   namespace: default
/// spec:
///   componentRef:
///     name: kubebb.nginx
///     namespace: kubebb-system
///   installVersion: 15.0.2
///   name: my-nginx
///   approved: true
///   override:
///     set:
///       - image.tag=1.25
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ComponentPlan",
    group = "core.kubebb.k8s.com.cn",
    version = "v1alpha1",
    namespaced,
    status = "ComponentPlanStatus",
    shortname = "cpl",
    printcolumn = r#"{"name":"Release", "type":"string", "jsonPath":".spec.name"}, {"name":"Version", "type":"string", "jsonPath":".spec.installVersion"}, {"name":"Succeeded", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Actioned\")].reason"}, {"name":"Revision", "type":"integer", "jsonPath":".status.installedRevision"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPlanSpec {
    /// Component to install from
    pub component_ref: NamespacedRef,
    /// Chart version to install
    pub install_version: String,
    /// Release name; immutable after creation
    pub name: String,
    /// Installation only proceeds once approved
    #[serde(default)]
    pub approved: bool,
    /// Values overriding chart defaults
    #[serde(default, rename = "override")]
    pub override_values: Override,
    /// Options passed through to the package-manager action
    #[serde(default)]
    pub config: ReleaseConfig,
    /// Identity that created the plan (stamped by admission)
    #[serde(default)]
    pub creator: Option<String>,
}

/// Value overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    /// Arbitrary values document merged over chart defaults
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
    /// `key=value` pairs, as `--set`
    #[serde(default)]
    pub set: Vec<String>,
    /// `key=value` pairs forced to strings, as `--set-string`
    #[serde(default)]
    pub set_string: Vec<String>,
}

fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    });
    Schema::try_from(schema_value).expect("Failed to create Schema for override values")
}

/// Options forwarded to install/upgrade/uninstall/rollback
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseConfig {
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub disable_hooks: bool,
    /// Timeout of a single package-manager action
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Release revisions kept by the package manager
    #[serde(default)]
    pub max_history: Option<u32>,
    /// Failed attempts allowed before the plan stops retrying
    #[serde(default)]
    pub max_retry: Option<u32>,
}

/// Status of the ComponentPlan resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPlanStatus {
    #[serde(default)]
    pub conditions: ConditionedStatus,
    /// Release revision produced by this plan, 0 when never installed
    #[serde(default)]
    pub installed_revision: i32,
    /// This plan produced the release revision currently deployed
    #[serde(default)]
    pub latest: Option<bool>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Resources found in the rendered manifest
    #[serde(default)]
    pub resources: Vec<ManifestResource>,
    /// Container images referenced by the rendered manifest
    #[serde(default)]
    pub images: Vec<String>,
}

/// Resource declared by the rendered manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ComponentPlan {
    pub fn conditions(&self) -> ConditionedStatus {
        self.status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }

    /// Reason of the `Actioned` condition, `Unspecified` when never set
    pub fn actioned_reason(&self) -> ConditionReason {
        self.status
            .as_ref()
            .map_or(ConditionReason::Unspecified, |s| {
                s.conditions.get_condition(ConditionType::Actioned).reason
            })
    }

    /// A package-manager action recorded for this plan is still in flight
    pub fn is_helm_doing(&self) -> bool {
        self.actioned_reason().is_in_progress()
    }

    pub fn installed_revision(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.installed_revision)
    }

    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// The current desired generation has not been observed yet
    pub fn generation_advanced(&self) -> bool {
        self.observed_generation()
            .is_none_or(|observed| self.generation() > observed)
    }

    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn name_or_unknown(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }
}
