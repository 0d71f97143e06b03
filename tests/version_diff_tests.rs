//! # Version Diff Tests
//!
//! Lockstep comparison of newest-first version lists and the component-level
//! create/update/deprecate decision built on it.

mod common;

use common::repository;
use component_controller::controller::repository::{
    build_target_components, component_version_diff, diff_components, CompiledFilters, IndexFile,
};
use component_controller::crd::ComponentVersion;

/// `"1*deprecated"` marks a deprecated version
fn versions(list: &[&str]) -> Vec<ComponentVersion> {
    list.iter()
        .map(|raw| {
            let (version, deprecated) = match raw.strip_suffix("*deprecated") {
                Some(version) => (version, true),
                None => (*raw, false),
            };
            ComponentVersion {
                version: version.to_string(),
                deprecated,
                ..Default::default()
            }
        })
        .collect()
}

#[test]
fn test_newly_deprecated_version() {
    let diff = component_version_diff(&versions(&["2", "1"]), &versions(&["2", "1*deprecated"]));
    assert!(diff.added.is_empty());
    assert!(diff.deleted.is_empty());
    assert_eq!(diff.deprecated, vec!["1"]);
}

#[test]
fn test_already_deprecated_version_is_not_reported_again() {
    let diff = component_version_diff(
        &versions(&["2", "1*deprecated"]),
        &versions(&["2", "1*deprecated"]),
    );
    assert!(diff.is_empty());
}

#[test]
fn test_new_version_on_top() {
    let diff = component_version_diff(&versions(&["2", "1"]), &versions(&["3", "2", "1"]));
    assert_eq!(diff.added, vec!["3"]);
    assert!(diff.deleted.is_empty());
    assert!(diff.deprecated.is_empty());
}

#[test]
fn test_disjoint_lists() {
    let diff = component_version_diff(&versions(&["3", "2", "1"]), &versions(&["5", "4"]));
    assert_eq!(diff.added, vec!["5", "4"]);
    assert_eq!(diff.deleted, vec!["3", "2", "1"]);
}

#[test]
fn test_interleaved_changes() {
    let diff = component_version_diff(
        &versions(&["1.4.0", "1.2.0", "1.0.0"]),
        &versions(&["1.5.0", "1.4.0", "1.1.0", "1.0.0"]),
    );
    assert_eq!(diff.added, vec!["1.5.0", "1.1.0"]);
    assert_eq!(diff.deleted, vec!["1.2.0"]);
}

#[test]
fn test_semantic_equality_ignores_prefix_and_padding() {
    let diff = component_version_diff(&versions(&["v1.0"]), &versions(&["1.0.0"]));
    assert!(diff.is_empty());
}

const INDEX_V1: &str = r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: 1.0.0
      digest: aaa
      description: web server
  redis:
    - name: redis
      version: 7.0.0
      digest: bbb
"#;

const INDEX_V2: &str = r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: 1.0.0
      digest: aaa
      description: web server
    - name: nginx
      version: 1.1.0
      digest: ccc
      description: web server
"#;

#[test]
fn test_index_change_creates_updates_and_deprecates() {
    let repo = repository("bitnami", "http://charts.example.com");
    let filters = CompiledFilters::default();

    let first = IndexFile::parse("http://charts.example.com/index.yaml", INDEX_V1).unwrap();
    let diff = diff_components(&[], build_target_components(&repo, &first, &filters));
    assert_eq!(diff.create.len(), 2);
    assert!(diff.update.is_empty() && diff.deprecate.is_empty());

    let existing = diff.create;
    let second = IndexFile::parse("http://charts.example.com/index.yaml", INDEX_V2).unwrap();
    let targets = build_target_components(&repo, &second, &filters);
    let nginx = targets.iter().find(|c| c.chart_name() == "nginx").unwrap();
    let listed: Vec<&str> = nginx.versions().iter().map(|v| v.version.as_str()).collect();
    assert_eq!(listed, vec!["1.1.0", "1.0.0"]);

    let diff = diff_components(&existing, targets);
    assert!(diff.create.is_empty());
    assert_eq!(diff.update.len(), 1);
    assert_eq!(diff.deprecate.len(), 1);
    assert!(diff.deprecate[0].is_deprecated());
    assert_eq!(diff.deprecate[0].chart_name(), "redis");

    // Nothing changes once the deprecation is recorded
    let mut recorded = vec![diff.update[0].clone(), diff.deprecate[0].clone()];
    recorded.sort_by_key(|c| c.chart_name());
    let again = diff_components(
        &recorded,
        build_target_components(&repo, &second, &filters),
    );
    assert!(again.is_empty());
}
