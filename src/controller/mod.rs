//! # Controller
//!
//! Reconcilers and the machinery they share.
//!
//! ## Sub-modules
//!
//! - `repository` - Repository poll loops and the index diff engine
//! - `plan` - ComponentPlan state machine
//! - `release` - Release worker pool and the Helm package manager
//! - `subscription` - Subscription reconciler and reverse index
//! - `annotations` - Typed accessors for annotation-encoded state
//! - `backoff` - Fibonacci backoff for the error policy
//! - `validation` - Spec validation
//! - `watch` - Secondary watch mapping
//! - `server` - Metrics and probe endpoints

pub mod annotations;
pub mod backoff;
pub mod error;
pub mod plan;
pub mod release;
pub mod repository;
pub mod server;
pub mod subscription;
pub mod validation;
pub mod watch;
