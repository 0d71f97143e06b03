//! # Component
//!
//! A package discovered in a Repository together with its available versions.
//! Components are written only by the repository sync loop of their owning Repository.

use crate::crd::NamespacedRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Component Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Component",
    group = "core.kubebb.k8s.com.cn",
    version = "v1alpha1",
    namespaced,
    status = "ComponentStatus",
    shortname = "com",
    printcolumn = r#"{"name":"Latest", "type":"string", "jsonPath":".status.versions[0].version"}, {"name":"Deprecated", "type":"boolean", "jsonPath":".status.deprecated"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Human-friendly name shown by portals
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Discovered package metadata and versions
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Repository that owns this component
    #[serde(default)]
    pub repository_ref: Option<NamespacedRef>,
    /// Package name as published in the repository index
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    /// Versions sorted newest first
    #[serde(default)]
    pub versions: Vec<ComponentVersion>,
    /// The package disappeared from the repository index
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub url: String,
}

/// One published version of a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersion {
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Component {
    pub fn versions(&self) -> &[ComponentVersion] {
        self.status.as_ref().map_or(&[], |s| s.versions.as_slice())
    }

    pub fn is_deprecated(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.deprecated)
    }

    pub fn repository_ref(&self) -> Option<&NamespacedRef> {
        self.status.as_ref().and_then(|s| s.repository_ref.as_ref())
    }

    /// Package name in the repository index, falling back to the object name suffix
    pub fn chart_name(&self) -> String {
        match self.status.as_ref().map(|s| s.name.as_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let object_name = self.metadata.name.as_deref().unwrap_or_default();
                object_name
                    .split_once('.')
                    .map_or(object_name, |(_, chart)| chart)
                    .to_string()
            }
        }
    }

    /// Newest version that is not deprecated
    pub fn latest_version(&self) -> Option<&ComponentVersion> {
        self.versions().iter().find(|v| !v.deprecated)
    }

    pub fn find_version(&self, version: &str) -> Option<&ComponentVersion> {
        self.versions().iter().find(|v| v.version == version)
    }
}
