//! # Repository Diff Engine
//!
//! Turns a remote chart repository index into `Component` resources.
//!
//! ## Flow
//!
//! 1. The Repository reconciler keeps one poll loop per Repository ([`RepositoryWatchers`])
//! 2. Each tick fetches `<url>/index.yaml` ([`IndexFetcher`]), applies the keep/ignore
//!    filters ([`CompiledFilters`]) and builds the target Components
//! 3. Targets are diffed against the recorded Components ([`diff_components`]) and the
//!    delta is written through a [`ComponentStore`]
//! 4. `Ready` and `Synced` are appended to the Repository's bounded condition log

mod auth;
mod diff;
mod fetcher;
mod filter;
mod reconciler;
mod store;
mod syncer;
pub mod version;
mod watcher;

pub use auth::{CredentialSource, KubeCredentialSource, RepositoryAuth};
pub use diff::{
    build_target_components, component_version_diff, diff_components, ComponentDiff, VersionDiff,
};
pub use fetcher::{ChartVersion, FetchError, FetchOptions, IndexFetcher, IndexFile};
pub use filter::{CompiledFilters, FilterError};
pub use reconciler::{
    condition_log_update, reconcile_repository, url_history_update, RepositoryContext,
};
pub use store::{ComponentStore, KubeComponentStore, StoreError};
pub use syncer::{RepositorySyncer, SyncError, SyncSummary};
pub use watcher::{run_poll_loop, watcher_key, RepositoryWatchers};
