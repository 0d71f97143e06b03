//! # Observability
//!
//! Prometheus metrics. Logging goes through `tracing` and is configured at startup.

pub mod metrics;
