//! # Release Management
//!
//! Package-manager seam, Helm CLI implementation and the worker pool that runs
//! release actions in the background.
//!
//! ## Sub-modules
//!
//! - `types` - Release keys, snapshots, requests and job states
//! - `package_manager` - `PackageManager` trait and `ReleaseError`
//! - `helm` - `helm` binary implementation
//! - `cache` - TTL result cache
//! - `pool` - `ReleaseWorkerPool`

mod cache;
mod helm;
mod package_manager;
mod pool;
mod types;

pub use cache::ResultCache;
pub use helm::HelmCli;
pub use package_manager::{PackageManager, ReleaseError, ReleaseFailureReason};
pub use pool::{JobIdentity, PoolError, ReleaseWorkerPool};
pub use types::{ChartRef, JobClass, JobState, Release, ReleaseKey, ReleaseRequest, ReleaseStatus};
