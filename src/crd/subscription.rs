//! # Subscription
//!
//! Follows a Component and creates a ComponentPlan whenever a newer version appears.

use crate::crd::component_plan::{Override, ReleaseConfig};
use crate::crd::condition::ConditionedStatus;
use crate::crd::NamespacedRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subscription Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Subscription",
    group = "core.kubebb.k8s.com.cn",
    version = "v1alpha1",
    namespaced,
    status = "SubscriptionStatus",
    shortname = "sub",
    printcolumn = r#"{"name":"Component", "type":"string", "jsonPath":".spec.componentRef.name"}, {"name":"Method", "type":"string", "jsonPath":".spec.componentPlanInstallMethod"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub component_ref: NamespacedRef,
    /// Release name used by generated plans
    pub name: String,
    #[serde(default)]
    pub component_plan_install_method: InstallMethod,
    #[serde(default, rename = "override")]
    pub override_values: Override,
    #[serde(default)]
    pub config: ReleaseConfig,
}

/// Whether generated plans are approved on creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub conditions: ConditionedStatus,
    /// Versions installed through this subscription, newest last
    #[serde(default)]
    pub installed: Vec<InstalledRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstalledRecord {
    pub version: String,
    pub component_plan_ref: NamespacedRef,
    #[serde(default)]
    pub installed_time: Option<String>,
}

impl Subscription {
    /// Component reference with the subscription namespace as fallback
    pub fn component_key(&self) -> (String, String) {
        let namespace = self
            .spec
            .component_ref
            .namespace
            .clone()
            .or_else(|| self.metadata.namespace.clone())
            .unwrap_or_else(|| "default".to_string());
        (namespace, self.spec.component_ref.name.clone())
    }

    pub fn installed(&self) -> &[InstalledRecord] {
        self.status.as_ref().map_or(&[], |s| s.installed.as_slice())
    }
}
