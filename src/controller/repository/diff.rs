//! # Component Diff
//!
//! Turns a filtered repository index into target Components and computes the
//! create/update/deprecate delta against the Components already recorded.

use super::fetcher::IndexFile;
use super::filter::CompiledFilters;
use super::version::{compare_versions, sort_descending};
use crate::constants;
use crate::crd::{Component, ComponentSpec, ComponentStatus, ComponentVersion, NamespacedRef, Repository};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Versions gained, lost or newly deprecated between two descending lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDiff {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub deprecated: Vec<String>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.deprecated.is_empty()
    }
}

/// Walk two newest-first version lists in lockstep.
///
/// Equal versions advance both sides and report a deprecation only on a
/// false-to-true transition. A greater new version is added, a greater old
/// version is deleted. Equality is semantic (`v1.0` equals `1.0.0`).
pub fn component_version_diff(old: &[ComponentVersion], new: &[ComponentVersion]) -> VersionDiff {
    let mut diff = VersionDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match compare_versions(&new[j].version, &old[i].version) {
            Ordering::Equal => {
                if !old[i].deprecated && new[j].deprecated {
                    diff.deprecated.push(new[j].version.clone());
                }
                i += 1;
                j += 1;
            }
            Ordering::Greater => {
                diff.added.push(new[j].version.clone());
                j += 1;
            }
            Ordering::Less => {
                diff.deleted.push(old[i].version.clone());
                i += 1;
            }
        }
    }
    diff.added.extend(new[j..].iter().map(|v| v.version.clone()));
    diff.deleted.extend(old[i..].iter().map(|v| v.version.clone()));
    diff
}

/// Components the repository should have after filtering, versions newest first.
///
/// Ignored packages and packages whose every version is filtered out produce no
/// Component.
pub fn build_target_components(
    repository: &Repository,
    index: &IndexFile,
    filters: &CompiledFilters,
) -> Vec<Component> {
    let namespace = repository.namespace().unwrap_or_default();
    let repository_name = repository.name_any();
    let owner = repository.controller_owner_ref(&());

    index
        .entries
        .iter()
        .filter(|(name, _)| !filters.ignores_package(name))
        .filter_map(|(name, entries)| {
            let mut kept: Vec<_> = entries
                .iter()
                .filter(|entry| filters.keeps_version(name, &entry.version, entry.deprecated))
                .collect();
            if kept.is_empty() {
                return None;
            }
            sort_descending(&mut kept, |entry| entry.version.as_str());
            let newest = kept[0];

            let versions = kept
                .iter()
                .map(|entry| ComponentVersion {
                    version: entry.version.clone(),
                    app_version: entry.app_version.clone(),
                    digest: entry.digest.clone(),
                    deprecated: entry.deprecated,
                    created_at: entry.created.clone(),
                    updated_at: None,
                })
                .collect();

            Some(Component {
                metadata: ObjectMeta {
                    name: Some(repository.component_name(name)),
                    namespace: Some(namespace.clone()),
                    labels: Some(BTreeMap::from([(
                        constants::COMPONENT_REPOSITORY_LABEL.to_string(),
                        repository_name.clone(),
                    )])),
                    owner_references: owner.clone().map(|o| vec![o]),
                    ..Default::default()
                },
                spec: ComponentSpec::default(),
                status: Some(ComponentStatus {
                    repository_ref: Some(NamespacedRef::new(namespace.clone(), repository_name.clone())),
                    name: name.clone(),
                    description: newest.description.clone(),
                    home: newest.home.clone(),
                    icon: newest.icon.clone(),
                    keywords: newest.keywords.clone(),
                    sources: newest.sources.clone(),
                    maintainers: newest.maintainers.clone(),
                    versions,
                    deprecated: false,
                }),
            })
        })
        .collect()
}

/// Writes needed to bring recorded Components in line with the index
#[derive(Debug, Default)]
pub struct ComponentDiff {
    pub create: Vec<Component>,
    /// Existing objects carrying the new status
    pub update: Vec<Component>,
    /// Existing objects marked deprecated
    pub deprecate: Vec<Component>,
}

impl ComponentDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.deprecate.is_empty()
    }
}

fn object_key(component: &Component) -> (String, String) {
    (component.namespace().unwrap_or_default(), component.name_any())
}

fn digests(component: &Component) -> Vec<&str> {
    component.versions().iter().map(|v| v.digest.as_str()).collect()
}

/// Three-way reconcile by `(namespace, name)`.
///
/// Target-only components are created. Components on both sides are updated when
/// the version count differs, the existing one is deprecated, the digests differ
/// or a version became deprecated. Existing-only components are marked deprecated.
pub fn diff_components(existing: &[Component], target: Vec<Component>) -> ComponentDiff {
    let mut remaining: HashMap<(String, String), &Component> =
        existing.iter().map(|c| (object_key(c), c)).collect();
    let mut diff = ComponentDiff::default();

    for wanted in target {
        let Some(current) = remaining.remove(&object_key(&wanted)) else {
            diff.create.push(wanted);
            continue;
        };
        let changed = current.versions().len() != wanted.versions().len()
            || current.is_deprecated()
            || digests(current) != digests(&wanted)
            || !component_version_diff(current.versions(), wanted.versions()).is_empty();
        if changed {
            let mut updated = current.clone();
            updated.status = wanted.status;
            diff.update.push(updated);
        }
    }

    let mut orphans: Vec<&Component> = remaining
        .into_values()
        .filter(|c| !c.is_deprecated())
        .collect();
    orphans.sort_by_key(|c| object_key(c));
    for orphan in orphans {
        let mut deprecated = orphan.clone();
        deprecated.status.get_or_insert_with(Default::default).deprecated = true;
        diff.deprecate.push(deprecated);
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RepositorySpec;

    fn versions(list: &[(&str, bool)]) -> Vec<ComponentVersion> {
        list.iter()
            .map(|(v, deprecated)| ComponentVersion {
                version: (*v).to_string(),
                digest: format!("sha-{v}"),
                deprecated: *deprecated,
                ..Default::default()
            })
            .collect()
    }

    fn component(name: &str, list: &[(&str, bool)], deprecated: bool) -> Component {
        let mut component = Component::new(name, ComponentSpec::default());
        component.metadata.namespace = Some("ns".to_string());
        component.status = Some(ComponentStatus {
            versions: versions(list),
            deprecated,
            ..Default::default()
        });
        component
    }

    #[test]
    fn test_version_diff_deprecation_only_on_transition() {
        let diff = component_version_diff(
            &versions(&[("2", false), ("1", true)]),
            &versions(&[("2", true), ("1", true)]),
        );
        assert_eq!(diff.deprecated, vec!["2"]);
        assert!(diff.added.is_empty() && diff.deleted.is_empty());
    }

    #[test]
    fn test_diff_creates_updates_and_deprecates() {
        let existing = vec![
            component("repo.same", &[("1.0.0", false)], false),
            component("repo.grown", &[("1.0.0", false)], false),
            component("repo.gone", &[("1.0.0", false)], false),
            component("repo.already-gone", &[("1.0.0", false)], true),
        ];
        let target = vec![
            component("repo.same", &[("1.0.0", false)], false),
            component("repo.grown", &[("1.1.0", false), ("1.0.0", false)], false),
            component("repo.new", &[("0.1.0", false)], false),
        ];
        let diff = diff_components(&existing, target);
        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.create[0].name_any(), "repo.new");
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0].versions().len(), 2);
        assert_eq!(diff.deprecate.len(), 1);
        assert_eq!(diff.deprecate[0].name_any(), "repo.gone");
        assert!(diff.deprecate[0].is_deprecated());
    }

    #[test]
    fn test_deprecated_component_reappearing_is_updated() {
        let existing = vec![component("repo.back", &[("1.0.0", false)], true)];
        let target = vec![component("repo.back", &[("1.0.0", false)], false)];
        let diff = diff_components(&existing, target);
        assert_eq!(diff.update.len(), 1);
        assert!(!diff.update[0].is_deprecated());
    }

    #[test]
    fn test_build_targets_sorted_and_labelled() {
        let mut repo = Repository::new(
            "charts",
            RepositorySpec {
                url: "http://example.com".to_string(),
                repository_type: Default::default(),
                auth_secret: None,
                insecure: false,
                pull_strategy: None,
                filter: vec![],
            },
        );
        repo.metadata.namespace = Some("kubebb-system".to_string());
        repo.metadata.uid = Some("repo-uid".to_string());
        let index = IndexFile::parse(
            "u",
            "entries:\n  nginx:\n    - version: 1.0.0\n    - version: 1.2.0\n    - version: 1.10.0\n",
        )
        .unwrap();
        let targets = build_target_components(&repo, &index, &CompiledFilters::default());
        assert_eq!(targets.len(), 1);
        let nginx = &targets[0];
        assert_eq!(nginx.name_any(), "charts.nginx");
        assert_eq!(
            nginx.labels().get(constants::COMPONENT_REPOSITORY_LABEL).map(String::as_str),
            Some("charts")
        );
        let order: Vec<_> = nginx.versions().iter().map(|v| v.version.as_str()).collect();
        assert_eq!(order, vec!["1.10.0", "1.2.0", "1.0.0"]);
        assert_eq!(nginx.metadata.owner_references.as_ref().map(Vec::len), Some(1));
    }
}
