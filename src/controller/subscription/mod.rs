//! # Subscriptions
//!
//! A Subscription follows one Component; each newer version produces a ComponentPlan.

mod reconciler;
mod registry;

pub use reconciler::{
    needs_plan, plan_for_subscription, plan_name, reconcile_subscription, SubscriptionContext,
};
pub use registry::{ComponentKey, SubscriptionIndex, SubscriptionKey};
