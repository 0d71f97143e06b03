//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliations, errors and requeues per resource kind
//! - `release_metrics` - Release worker pool jobs
//! - `repository_metrics` - Repository index syncs and Component writes

pub mod controller_metrics;
pub mod registry;
pub mod release_metrics;
pub mod repository_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use release_metrics::*;
pub use repository_metrics::*;
