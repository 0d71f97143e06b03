//! # Constants
//!
//! Default values, annotation keys and label names shared across the controller.

// API group prefix for labels, annotations and finalizers
pub const API_GROUP: &str = "core.kubebb.k8s.com.cn";

/// Finalizer holding ComponentPlan and Repository deletion until cleanup completes
pub const FINALIZER: &str = "core.kubebb.k8s.com.cn/finalizer";

/// Failed-attempt counter of a ComponentPlan (decimal)
pub const RETRY_ANNOTATION: &str = "core.kubebb.k8s.com.cn/componentplan-retry";
/// Generation the retry counter was recorded for
pub const RETRY_GENERATION_ANNOTATION: &str = "core.kubebb.k8s.com.cn/componentplan-retry-generation";

/// Presence requests a rollback to the plan's installed revision
pub const ROLLBACK_ANNOTATION: &str = "core.kubebb.k8s.com.cn/componentplan-rollback";

/// Marks ComponentPlans that target the same release
pub const RELEASE_LABEL: &str = "core.kubebb.k8s.com.cn/componentplan-release";

/// Marks Components owned by a Repository
pub const COMPONENT_REPOSITORY_LABEL: &str = "kubebb.component.repository";

/// Marks ComponentPlans created by a Subscription
pub const SUBSCRIPTION_LABEL: &str = "core.kubebb.k8s.com.cn/subscription";

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "component-controller";

/// Message pinned on `Succeeded` once the retry budget is spent
pub const RETRY_LIMIT_EXCEEDED: &str = "retry limit exceeded";

/// ConfigMap holding a plan's rendered manifest is named `<prefix><plan>`
pub const MANIFEST_CONFIGMAP_PREFIX: &str = "manifest-";

/// Data key of the rendered manifest in the ConfigMap
pub const MANIFEST_CONFIGMAP_KEY: &str = "manifest";

// Repository polling defaults
pub const DEFAULT_PULL_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PULL_RETRY: u32 = 5;
/// Lower bound applied to every repository poll interval
pub const MIN_PULL_INTERVAL_SECS: u64 = 120;
/// Pause between failed index fetch attempts
pub const DEFAULT_PULL_RETRY_BACKOFF_MS: u64 = 500;

// Fixed-length condition logs on Repository status
pub const REPOSITORY_CONDITION_LOG_LEN: usize = 10;
pub const URL_HISTORY_LEN: usize = 10;

// ComponentPlan defaults
pub const DEFAULT_MAX_RETRY: u32 = 5;
/// Requeue while a release action is in flight
pub const DEFAULT_PLAN_POLL_SECS: u64 = 5;
/// Requeue while waiting on a dependency (component, repository, uninstall)
pub const DEFAULT_PLAN_WAIT_SECS: u64 = 10;
/// Requeue after a transient failure recorded as `WaitDo`
pub const DEFAULT_PLAN_TRANSIENT_REQUEUE_SECS: u64 = 30;
/// Default timeout of one package-manager action
pub const DEFAULT_RELEASE_TIMEOUT_SECS: u64 = 300;

// Release worker pool
/// How long finished job results stay queryable
pub const DEFAULT_RESULT_TTL_SECS: u64 = 300;

// Subscription
pub const DEFAULT_SUBSCRIPTION_RESYNC_SECS: u64 = 300;

// Error backoff (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 1;
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 60;

// Watch restart
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

// HTTP server
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
