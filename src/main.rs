//! # Component Controller
//!
//! Kubernetes controller that discovers Helm chart versions from repositories and
//! drives component releases through declarative `ComponentPlan`s.
//!
//! ## Overview
//!
//! 1. **Repository sync** - polls each `Repository` index and records its packages as `Component`s
//! 2. **ComponentPlan** - renders a manifest preview, waits for approval and runs the release
//! 3. **Subscriptions** - create a `ComponentPlan` when a followed component publishes a new version
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for configuration and deployment.

use anyhow::Result;
use component_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;
    run_watch_loop(init_result).await
}
