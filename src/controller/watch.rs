//! # Watch Mapping
//!
//! Secondary resources that trigger Subscription reconciles. Each watched kind is
//! one variant, so adding a kind forces the mapping below to handle it.

use crate::constants;
use crate::controller::subscription::SubscriptionIndex;
use crate::crd::{Component, ComponentPlan, Subscription};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

/// An object event relevant to Subscriptions
#[derive(Debug, Clone, Copy)]
pub enum WatchedObject<'a> {
    /// New versions may have appeared
    Component(&'a Component),
    /// A generated plan changed; its Subscription may record the outcome
    ComponentPlan(&'a ComponentPlan),
}

impl WatchedObject<'_> {
    /// Subscriptions to reconcile for this event
    pub fn subscriptions(&self, index: &SubscriptionIndex) -> Vec<ObjectRef<Subscription>> {
        match self {
            WatchedObject::Component(component) => {
                let key = (
                    component.namespace().unwrap_or_default(),
                    component.name_any(),
                );
                index
                    .lookup(&key)
                    .into_iter()
                    .map(|(namespace, name)| ObjectRef::new(&name).within(&namespace))
                    .collect()
            }
            WatchedObject::ComponentPlan(plan) => plan
                .labels()
                .get(constants::SUBSCRIPTION_LABEL)
                .map(|name| {
                    vec![ObjectRef::new(name).within(plan.namespace_or_default())]
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ComponentPlanSpec, NamespacedRef};
    use std::collections::BTreeMap;

    #[test]
    fn test_component_maps_through_index() {
        let index = SubscriptionIndex::new();
        index.add(
            ("kubebb-system".to_string(), "kubebb.nginx".to_string()),
            ("default".to_string(), "follow-nginx".to_string()),
        );
        let mut component = Component::new("kubebb.nginx", Default::default());
        component.metadata.namespace = Some("kubebb-system".to_string());

        let refs = WatchedObject::Component(&component).subscriptions(&index);
        assert_eq!(refs, vec![ObjectRef::new("follow-nginx").within("default")]);
    }

    #[test]
    fn test_plan_maps_through_label() {
        let index = SubscriptionIndex::new();
        let mut plan = ComponentPlan::new(
            "follow-nginx-1.0.0",
            ComponentPlanSpec {
                component_ref: NamespacedRef::new("kubebb-system", "kubebb.nginx"),
                install_version: "1.0.0".to_string(),
                name: "my-nginx".to_string(),
                approved: true,
                override_values: Default::default(),
                config: Default::default(),
                creator: None,
            },
        );
        plan.metadata.namespace = Some("default".to_string());
        assert!(WatchedObject::ComponentPlan(&plan).subscriptions(&index).is_empty());

        plan.metadata.labels = Some(BTreeMap::from([(
            constants::SUBSCRIPTION_LABEL.to_string(),
            "follow-nginx".to_string(),
        )]));
        let refs = WatchedObject::ComponentPlan(&plan).subscriptions(&index);
        assert_eq!(refs, vec![ObjectRef::new("follow-nginx").within("default")]);
    }
}
