//! # Controller Settings
//!
//! Reconcile cadence, retry budget and worker pool tuning.

use super::env_var_or_default;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Retry budget used when a plan does not set `config.maxRetry`
    pub default_max_retry: u32,
    /// Requeue while a release action is in flight (seconds)
    pub plan_poll_secs: u64,
    /// Requeue while waiting on a component or repository (seconds)
    pub plan_wait_secs: u64,
    /// Requeue after a transient plan failure (seconds)
    pub plan_transient_requeue_secs: u64,
    /// Timeout of one package-manager action unless the plan sets one (seconds)
    pub release_timeout_secs: u64,
    /// How long finished release results stay queryable (seconds)
    pub result_ttl_secs: u64,
    /// Floor applied to every repository poll interval (seconds)
    pub min_pull_interval_secs: u64,
    /// Pause between failed index fetch attempts (milliseconds)
    pub pull_retry_backoff_ms: u64,
    /// Periodic subscription resync (seconds)
    pub subscription_resync_secs: u64,
    /// Error backoff bounds (seconds)
    pub error_backoff_min_secs: u64,
    pub error_backoff_max_secs: u64,
    /// Explicit path to the helm binary; looked up on PATH when unset
    pub helm_bin: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            watch_namespace: None,
            default_max_retry: DEFAULT_MAX_RETRY,
            plan_poll_secs: DEFAULT_PLAN_POLL_SECS,
            plan_wait_secs: DEFAULT_PLAN_WAIT_SECS,
            plan_transient_requeue_secs: DEFAULT_PLAN_TRANSIENT_REQUEUE_SECS,
            release_timeout_secs: DEFAULT_RELEASE_TIMEOUT_SECS,
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
            min_pull_interval_secs: MIN_PULL_INTERVAL_SECS,
            pull_retry_backoff_ms: DEFAULT_PULL_RETRY_BACKOFF_MS,
            subscription_resync_secs: DEFAULT_SUBSCRIPTION_RESYNC_SECS,
            error_backoff_min_secs: DEFAULT_ERROR_BACKOFF_MIN_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
            helm_bin: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty()),
            default_max_retry: env_var_or_default("DEFAULT_MAX_RETRY", DEFAULT_MAX_RETRY),
            plan_poll_secs: env_var_or_default("PLAN_POLL_SECS", DEFAULT_PLAN_POLL_SECS),
            plan_wait_secs: env_var_or_default("PLAN_WAIT_SECS", DEFAULT_PLAN_WAIT_SECS),
            plan_transient_requeue_secs: env_var_or_default(
                "PLAN_TRANSIENT_REQUEUE_SECS",
                DEFAULT_PLAN_TRANSIENT_REQUEUE_SECS,
            ),
            release_timeout_secs: env_var_or_default(
                "RELEASE_TIMEOUT_SECS",
                DEFAULT_RELEASE_TIMEOUT_SECS,
            ),
            result_ttl_secs: env_var_or_default("RESULT_TTL_SECS", DEFAULT_RESULT_TTL_SECS),
            min_pull_interval_secs: env_var_or_default(
                "MIN_PULL_INTERVAL_SECS",
                MIN_PULL_INTERVAL_SECS,
            ),
            pull_retry_backoff_ms: env_var_or_default(
                "PULL_RETRY_BACKOFF_MS",
                DEFAULT_PULL_RETRY_BACKOFF_MS,
            ),
            subscription_resync_secs: env_var_or_default(
                "SUBSCRIPTION_RESYNC_SECS",
                DEFAULT_SUBSCRIPTION_RESYNC_SECS,
            ),
            error_backoff_min_secs: env_var_or_default(
                "ERROR_BACKOFF_MIN_SECS",
                DEFAULT_ERROR_BACKOFF_MIN_SECS,
            ),
            error_backoff_max_secs: env_var_or_default(
                "ERROR_BACKOFF_MAX_SECS",
                DEFAULT_ERROR_BACKOFF_MAX_SECS,
            ),
            helm_bin: std::env::var("HELM_BIN").ok().filter(|p| !p.is_empty()),
        }
    }

    pub fn plan_poll_interval(&self) -> Duration {
        Duration::from_secs(self.plan_poll_secs)
    }

    pub fn plan_wait_interval(&self) -> Duration {
        Duration::from_secs(self.plan_wait_secs)
    }

    pub fn plan_transient_requeue(&self) -> Duration {
        Duration::from_secs(self.plan_transient_requeue_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Effective retry budget of a plan
    pub fn max_retry(&self, plan_max_retry: Option<u32>) -> u32 {
        plan_max_retry.unwrap_or(self.default_max_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_retry_prefers_plan_value() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_retry(None), crate::constants::DEFAULT_MAX_RETRY);
        assert_eq!(config.max_retry(Some(2)), 2);
    }
}
