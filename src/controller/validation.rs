//! # Validation
//!
//! Validates Repository and ComponentPlan specs before any work is started.

use crate::controller::repository::CompiledFilters;
use crate::crd::{ComponentPlan, Repository, RepositoryType};
use anyhow::Result;
use regex::Regex;

/// Helm limits release names to 53 characters
const MAX_RELEASE_NAME_LEN: usize = 53;

/// Validate a Repository spec
pub fn validate_repository(repository: &Repository) -> Result<()> {
    let spec = &repository.spec;
    match spec.repository_type {
        RepositoryType::Http => validate_url(&spec.url, "url")?,
        RepositoryType::Oci => {
            if !spec.url.trim().starts_with("oci://") {
                return Err(anyhow::anyhow!(
                    "url '{}' must start with oci:// for repositoryType oci",
                    spec.url.trim()
                ));
            }
        }
    }

    if let Some(ref secret) = spec.auth_secret {
        if !secret.is_empty() {
            validate_kubernetes_name(secret, "authSecret")?;
        }
    }

    if let Some(ref strategy) = spec.pull_strategy {
        if strategy.timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "pullStategy.timeoutSeconds must be greater than 0"
            ));
        }
    }

    for (i, cond) in spec.filter.iter().enumerate() {
        if cond.name.trim().is_empty() {
            return Err(anyhow::anyhow!("filter[{i}].name is required but is empty"));
        }
    }
    CompiledFilters::compile(&spec.filter).map_err(|e| anyhow::anyhow!("Invalid filter: {e}"))?;

    Ok(())
}

/// Validate a ComponentPlan spec
pub fn validate_component_plan(plan: &ComponentPlan) -> Result<()> {
    let spec = &plan.spec;
    if spec.component_ref.name.is_empty() {
        return Err(anyhow::anyhow!("componentRef.name is required but is empty"));
    }
    validate_kubernetes_name(&spec.component_ref.name, "componentRef.name")?;

    if spec.install_version.trim().is_empty() {
        return Err(anyhow::anyhow!("installVersion is required but is empty"));
    }

    validate_release_name(&spec.name)?;

    for pair in spec.override_values.set.iter().chain(&spec.override_values.set_string) {
        if !pair.contains('=') {
            return Err(anyhow::anyhow!(
                "override entry '{pair}' must have the form key=value"
            ));
        }
    }

    Ok(())
}

/// Release names are RFC 1123 labels of at most 53 characters
fn validate_release_name(name: &str) -> Result<()> {
    let name_trimmed = name.trim();
    if name_trimmed.is_empty() {
        return Err(anyhow::anyhow!("name is required but is empty"));
    }
    if name_trimmed.len() > MAX_RELEASE_NAME_LEN {
        return Err(anyhow::anyhow!(
            "name '{}' exceeds maximum release name length of {} characters (got {})",
            name_trimmed,
            MAX_RELEASE_NAME_LEN,
            name_trimmed.len()
        ));
    }
    let label_regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;
    if !label_regex.is_match(name_trimmed) {
        return Err(anyhow::anyhow!(
            "name '{name_trimmed}' must be lowercase alphanumeric or hyphens and cannot start/end with a hyphen"
        ));
    }
    Ok(())
}

/// Validate Kubernetes resource name (RFC 1123 subdomain)
fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    let name_trimmed = name.trim();

    if name_trimmed.len() > 253 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 253 characters (got {})",
            field_name,
            name_trimmed,
            name_trimmed.len()
        ));
    }

    let name_regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !name_regex.is_match(name_trimmed) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name_trimmed}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }

    Ok(())
}

/// Validate URL format
fn validate_url(url: &str, field_name: &str) -> Result<()> {
    let url_trimmed = url.trim();

    if url_trimmed.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    let url_regex = Regex::new(r"^https?://[^\s/$.?#].[^\s]*$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !url_regex.is_match(url_trimmed) {
        return Err(anyhow::anyhow!(
            "{field_name} '{url_trimmed}' must be a valid URL starting with http:// or https://"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ComponentPlanSpec, FilterCond, NamespacedRef, RepositorySpec};

    fn repository(url: &str, repository_type: RepositoryType) -> Repository {
        Repository::new(
            "charts",
            RepositorySpec {
                url: url.to_string(),
                repository_type,
                auth_secret: None,
                insecure: false,
                pull_strategy: None,
                filter: vec![],
            },
        )
    }

    fn plan(release: &str) -> ComponentPlan {
        ComponentPlan::new(
            "p",
            ComponentPlanSpec {
                component_ref: NamespacedRef::new("kubebb-system", "charts.nginx"),
                install_version: "1.0.0".to_string(),
                name: release.to_string(),
                approved: false,
                override_values: Default::default(),
                config: Default::default(),
                creator: None,
            },
        )
    }

    #[test]
    fn test_repository_url_rules() {
        assert!(validate_repository(&repository("https://charts.example.com", RepositoryType::Http)).is_ok());
        assert!(validate_repository(&repository("ftp://charts", RepositoryType::Http)).is_err());
        assert!(validate_repository(&repository("oci://ghcr.io/charts", RepositoryType::Oci)).is_ok());
        assert!(validate_repository(&repository("https://ghcr.io", RepositoryType::Oci)).is_err());
    }

    #[test]
    fn test_repository_filter_name_required() {
        let mut repo = repository("https://charts.example.com", RepositoryType::Http);
        repo.spec.filter.push(FilterCond::default());
        assert!(validate_repository(&repo).is_err());
    }

    #[test]
    fn test_release_name_rules() {
        assert!(validate_component_plan(&plan("my-nginx")).is_ok());
        assert!(validate_component_plan(&plan("My_Nginx")).is_err());
        assert!(validate_component_plan(&plan(&"a".repeat(54))).is_err());
    }
}
