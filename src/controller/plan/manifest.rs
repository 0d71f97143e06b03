//! # Manifest Preview
//!
//! Extracts the resource list and container images from a rendered multi-document
//! manifest, and stores the manifest in a ConfigMap owned by the plan.

use crate::constants;
use crate::crd::{ComponentPlan, ManifestResource};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Resources and images found in a rendered manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    pub resources: Vec<ManifestResource>,
    pub images: Vec<String>,
}

const CONTAINER_LIST_KEYS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

/// Summarize every document of `manifest`; documents that are not objects are skipped
pub fn summarize_manifest(manifest: &str) -> ManifestSummary {
    let mut summary = ManifestSummary::default();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = match Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping unparsable manifest document: {}", e);
                continue;
            }
        };
        if let Some(resource) = resource_of(&value) {
            if !summary.resources.contains(&resource) {
                summary.resources.push(resource);
            }
        }
        collect_images(&value, &mut summary.images);
    }
    summary.images.sort();
    summary.images.dedup();
    summary
}

fn resource_of(value: &Value) -> Option<ManifestResource> {
    let str_at = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
    let metadata = value.get("metadata")?;
    Some(ManifestResource {
        api_version: str_at(value, "apiVersion")?,
        kind: str_at(value, "kind")?,
        name: str_at(metadata, "name")?,
        namespace: str_at(metadata, "namespace"),
    })
}

fn collect_images(value: &Value, images: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let is_container_list = key
                    .as_str()
                    .is_some_and(|k| CONTAINER_LIST_KEYS.contains(&k));
                match child {
                    Value::Sequence(containers) if is_container_list => {
                        images.extend(
                            containers
                                .iter()
                                .filter_map(|c| c.get("image").and_then(Value::as_str))
                                .map(str::to_string),
                        );
                    }
                    _ => collect_images(child, images),
                }
            }
        }
        Value::Sequence(items) => items.iter().for_each(|item| collect_images(item, images)),
        _ => {}
    }
}

/// Name of the ConfigMap holding the manifest of `plan`
pub fn manifest_configmap_name(plan: &ComponentPlan) -> String {
    format!("{}{}", constants::MANIFEST_CONFIGMAP_PREFIX, plan.name_any())
}

/// The manifest ConfigMap of `plan` exists
pub async fn manifest_cached(client: &Client, plan: &ComponentPlan) -> Result<bool, kube::Error> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), plan.namespace_or_default());
    Ok(api.get_opt(&manifest_configmap_name(plan)).await?.is_some())
}

/// Server-side apply the manifest ConfigMap, owned by `plan`
pub async fn store_manifest(
    client: &Client,
    plan: &ComponentPlan,
    manifest: &str,
) -> Result<(), kube::Error> {
    let name = manifest_configmap_name(plan);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), plan.namespace_or_default());
    let configmap = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(plan.namespace_or_default().to_string()),
            owner_references: plan.controller_owner_ref(&()).map(|owner| vec![owner]),
            labels: Some(BTreeMap::from([(
                constants::RELEASE_LABEL.to_string(),
                plan.spec.name.clone(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            constants::MANIFEST_CONFIGMAP_KEY.to_string(),
            manifest.to_string(),
        )])),
        ..Default::default()
    };
    api.patch(
        &name,
        &PatchParams::apply(constants::FIELD_MANAGER).force(),
        &Patch::Apply(&configmap),
    )
    .await?;
    debug!("Stored manifest preview in ConfigMap {}", name);
    Ok(())
}
