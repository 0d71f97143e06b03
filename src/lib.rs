//! # Component Controller
//!
//! A Kubernetes controller that drives the lifecycle of Helm-packaged components.
//!
//! ## Overview
//!
//! 1. **Repository sync** - polls a chart repository index, applies keep/ignore filters
//!    and records each package as a `Component` with its versions
//! 2. **ComponentPlan reconcile** - renders a manifest preview, waits for approval and
//!    drives install, upgrade, rollback and uninstall of one release
//! 3. **Release worker pool** - runs the package-manager actions off the reconcile path,
//!    one job per release and action class, with stale work cancelled by generation
//! 4. **Subscriptions** - create a `ComponentPlan` whenever a followed component
//!    publishes a newer version
//!
//! Outcomes are reported through typed `Condition`s on each resource.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;

pub use crd::*;
