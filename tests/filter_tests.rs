//! # Repository Filter Tests
//!
//! Keep/ignore rules applied while turning an index into Components.

mod common;

use common::repository;
use component_controller::controller::repository::{
    build_target_components, CompiledFilters, FilterError, IndexFile,
};
use component_controller::crd::{FilterCond, FilterOp, VersionedFilterCond};

const INDEX: &str = r#"
apiVersion: v1
entries:
  nginx:
    - { name: nginx, version: 1.0.0 }
    - { name: nginx, version: 1.1.0 }
    - { name: nginx, version: 2.0.0 }
    - { name: nginx, version: 2.1.0-rc.1 }
    - { name: nginx, version: 0.9.0, deprecated: true }
  redis:
    - { name: redis, version: 7.0.0 }
  mysql:
    - { name: mysql, version: 8.0.0, deprecated: true }
"#;

fn keep(name: &str, versioned: VersionedFilterCond) -> FilterCond {
    FilterCond {
        name: name.to_string(),
        operation: FilterOp::Keep,
        keep_deprecated: false,
        versioned_filter_cond: Some(versioned),
    }
}

fn kept_versions(filter: Vec<FilterCond>, chart: &str) -> Option<Vec<String>> {
    let repo = repository("bitnami", "http://charts.example.com");
    let index = IndexFile::parse("http://charts.example.com/index.yaml", INDEX).unwrap();
    let filters = CompiledFilters::compile(&filter).unwrap();
    build_target_components(&repo, &index, &filters)
        .into_iter()
        .find(|c| c.chart_name() == chart)
        .map(|c| c.versions().iter().map(|v| v.version.clone()).collect())
}

#[test]
fn test_no_rule_keeps_every_version() {
    assert_eq!(
        kept_versions(Vec::new(), "nginx").unwrap(),
        vec!["2.1.0-rc.1", "2.0.0", "1.1.0", "1.0.0", "0.9.0"]
    );
}

#[test]
fn test_ignore_drops_package() {
    let ignore = FilterCond {
        name: "redis".to_string(),
        operation: FilterOp::Ignore,
        ..Default::default()
    };
    assert!(kept_versions(vec![ignore], "redis").is_none());
    assert!(kept_versions(Vec::new(), "redis").is_some());
}

#[test]
fn test_keep_allow_list() {
    let rule = keep(
        "nginx",
        VersionedFilterCond {
            versions: vec!["1.1.0".to_string(), "v2.0".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(kept_versions(vec![rule], "nginx").unwrap(), vec!["2.0.0", "1.1.0"]);
}

#[test]
fn test_keep_regexp() {
    let rule = keep(
        "nginx",
        VersionedFilterCond {
            regexp: Some(r"^1\.".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(kept_versions(vec![rule], "nginx").unwrap(), vec!["1.1.0", "1.0.0"]);
}

#[test]
fn test_keep_constraint() {
    let rule = keep(
        "nginx",
        VersionedFilterCond {
            version_constraint: Some(">= 1.1.0, < 2.1.0".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(kept_versions(vec![rule], "nginx").unwrap(), vec!["2.0.0", "1.1.0"]);
}

#[test]
fn test_every_predicate_must_pass() {
    let rule = keep(
        "nginx",
        VersionedFilterCond {
            versions: vec!["1.0.0".to_string(), "2.0.0".to_string()],
            version_constraint: Some(">= 1.5.0".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(kept_versions(vec![rule], "nginx").unwrap(), vec!["2.0.0"]);
}

#[test]
fn test_deprecated_versions_need_keep_deprecated() {
    let mut rule = keep("mysql", VersionedFilterCond::default());
    assert!(kept_versions(vec![rule.clone()], "mysql").is_none());
    rule.keep_deprecated = true;
    assert_eq!(kept_versions(vec![rule], "mysql").unwrap(), vec!["8.0.0"]);
}

#[test]
fn test_fully_filtered_package_produces_no_component() {
    let rule = keep(
        "redis",
        VersionedFilterCond {
            version_constraint: Some("< 1.0.0".to_string()),
            ..Default::default()
        },
    );
    assert!(kept_versions(vec![rule], "redis").is_none());
}

#[test]
fn test_invalid_rules_are_rejected() {
    let bad_regexp = keep(
        "nginx",
        VersionedFilterCond {
            regexp: Some("(".to_string()),
            ..Default::default()
        },
    );
    assert!(matches!(
        CompiledFilters::compile(&[bad_regexp]),
        Err(FilterError::InvalidRegexp { .. })
    ));

    let bad_constraint = keep(
        "nginx",
        VersionedFilterCond {
            version_constraint: Some(">= banana".to_string()),
            ..Default::default()
        },
    );
    assert!(matches!(
        CompiledFilters::compile(&[bad_constraint]),
        Err(FilterError::InvalidConstraint { .. })
    ));
}
