//! # Custom Resource Definitions
//!
//! CRDs for the component controller, all in group `core.kubebb.k8s.com.cn/v1alpha1`.
//!
//! ## Sub-modules
//!
//! - `condition` - Condition records, keyed set and fixed-length log
//! - `repository` - Repository (chart index source)
//! - `component` - Component (package discovered in a repository)
//! - `component_plan` - ComponentPlan (one desired release)
//! - `subscription` - Subscription (follow a component)

mod component;
mod component_plan;
mod condition;
mod repository;
mod subscription;

pub use component::*;
pub use component_plan::*;
pub use condition::*;
pub use repository::*;
pub use subscription::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a namespaced object; the namespace defaults to the referrer's
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl NamespacedRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}
