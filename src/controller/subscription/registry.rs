//! # Subscription Index
//!
//! Reverse index from a Component to the Subscriptions following it, used to map
//! Component events onto Subscription reconciles.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `namespace/name` of a Component
pub type ComponentKey = (String, String);
/// `namespace/name` of a Subscription
pub type SubscriptionKey = (String, String);

#[derive(Debug, Default)]
struct IndexState {
    by_component: HashMap<ComponentKey, BTreeSet<SubscriptionKey>>,
    by_subscription: HashMap<SubscriptionKey, ComponentKey>,
}

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    state: Mutex<IndexState>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `subscription` follows `component`, replacing any previous target
    pub fn add(&self, component: ComponentKey, subscription: SubscriptionKey) {
        let mut state = self.lock();
        if let Some(previous) = state
            .by_subscription
            .insert(subscription.clone(), component.clone())
        {
            if previous != component {
                remove_entry(&mut state.by_component, &previous, &subscription);
            }
        }
        state
            .by_component
            .entry(component)
            .or_default()
            .insert(subscription);
    }

    /// Forget `subscription`; returns `true` when it was indexed
    pub fn remove(&self, subscription: &SubscriptionKey) -> bool {
        let mut state = self.lock();
        match state.by_subscription.remove(subscription) {
            Some(component) => {
                remove_entry(&mut state.by_component, &component, subscription);
                true
            }
            None => false,
        }
    }

    /// Subscriptions following `component`, in name order
    pub fn lookup(&self, component: &ComponentKey) -> Vec<SubscriptionKey> {
        self.lock()
            .by_component
            .get(component)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().by_subscription.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_subscription.is_empty()
    }
}

fn remove_entry(
    by_component: &mut HashMap<ComponentKey, BTreeSet<SubscriptionKey>>,
    component: &ComponentKey,
    subscription: &SubscriptionKey,
) {
    if let Some(subs) = by_component.get_mut(component) {
        subs.remove(subscription);
        if subs.is_empty() {
            by_component.remove(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ns: &str, name: &str) -> (String, String) {
        (ns.to_string(), name.to_string())
    }

    #[test]
    fn test_add_lookup_remove() {
        let index = SubscriptionIndex::new();
        let nginx = key("kubebb-system", "kubebb.nginx");
        index.add(nginx.clone(), key("default", "b"));
        index.add(nginx.clone(), key("default", "a"));
        assert_eq!(index.lookup(&nginx), vec![key("default", "a"), key("default", "b")]);

        assert!(index.remove(&key("default", "a")));
        assert!(!index.remove(&key("default", "a")));
        assert_eq!(index.lookup(&nginx), vec![key("default", "b")]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_retarget_moves_subscription() {
        let index = SubscriptionIndex::new();
        let nginx = key("kubebb-system", "kubebb.nginx");
        let redis = key("kubebb-system", "kubebb.redis");
        index.add(nginx.clone(), key("default", "sub"));
        index.add(redis.clone(), key("default", "sub"));
        assert!(index.lookup(&nginx).is_empty());
        assert_eq!(index.lookup(&redis), vec![key("default", "sub")]);
    }
}
