//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use crate::constants;
use crate::controller::backoff::BackoffRegistry;
use crate::controller::error::ReconcilerError;
use crate::controller::plan::PlanContext;
use crate::controller::repository::RepositoryContext;
use crate::controller::subscription::SubscriptionContext;
use crate::observability;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reconciler context that carries per-resource error backoff
pub trait BackoffContext {
    /// Resource kind used in logs and metric labels
    const KIND: &'static str;

    fn backoff(&self) -> &BackoffRegistry;
}

impl BackoffContext for RepositoryContext {
    const KIND: &'static str = "repository";

    fn backoff(&self) -> &BackoffRegistry {
        &self.backoff
    }
}

impl BackoffContext for PlanContext {
    const KIND: &'static str = "componentplan";

    fn backoff(&self) -> &BackoffRegistry {
        &self.backoff
    }
}

impl BackoffContext for SubscriptionContext {
    const KIND: &'static str = "subscription";

    fn backoff(&self) -> &BackoffRegistry {
        &self.backoff
    }
}

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing object never delays the others.
pub fn handle_reconciliation_error<K, C>(obj: Arc<K>, error: &ReconcilerError, ctx: Arc<C>) -> Action
where
    K: Resource,
    C: BackoffContext,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = C::KIND,
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}: {:?}", C::KIND, name, error);
    observability::metrics::increment_reconciliation_errors(C::KIND, error.metric_label());

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = ctx.backoff().next_delay(&resource_key);

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(std::time::Duration::from_secs(backoff_seconds))
}

/// Classification of a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorKind {
    pub fn classify(error_string: &str) -> Self {
        if error_string.contains("401")
            || error_string.contains("Unauthorized")
            || error_string.contains("WatchFailed")
        {
            WatchErrorKind::Unauthorized
        } else if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            WatchErrorKind::Expired
        } else if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            WatchErrorKind::Throttled
        } else if error_string.contains("ObjectNotFound")
            || (error_string.contains("404") && error_string.contains("not found"))
        {
            WatchErrorKind::NotFound
        } else {
            WatchErrorKind::Other
        }
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` when the watch should pause before continuing, `Some(())` when the
/// error is expected and the stream continues immediately.
pub async fn handle_watch_stream_error(
    kind: &str,
    error_string: &str,
    backoff: &Arc<std::sync::atomic::AtomicU64>,
    max_backoff_ms: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource.kind = kind,
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("❌ Watch authentication failed for {} (401 Unauthorized) - RBAC may have been revoked or token expired", kind);
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify ClusterRole 'component-controller' still exists:");
            error!("      kubectl get clusterrole component-controller");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding component-controller -o yaml");
            error!("   3. Verify RBAC permissions are still active:");
            error!("      kubectl auth can-i list {}s --as=system:serviceaccount:kubebb-system:component-controller --all-namespaces", kind);
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS
            );
            tokio::time::sleep(std::time::Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::Throttled => {
            let current_backoff = backoff.load(std::sync::atomic::Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(std::time::Duration::from_millis(current_backoff)).await;
            let new_backoff = std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms);
            backoff.store(new_backoff, std::sync::atomic::Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!("{} not found (likely deleted), continuing watch...", kind);
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error for {}: {}", kind, error_string);
            tokio::time::sleep(std::time::Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: 401 Unauthorized"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            WatchErrorKind::classify("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(
            WatchErrorKind::classify("ObjectNotFound(ObjectRef { .. })"),
            WatchErrorKind::NotFound
        );
        assert_eq!(WatchErrorKind::classify("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_doubles_backoff_up_to_max() {
        let backoff = Arc::new(std::sync::atomic::AtomicU64::new(400));
        assert!(handle_watch_stream_error("repository", "429 TooManyRequests", &backoff, 1000)
            .await
            .is_none());
        assert_eq!(backoff.load(std::sync::atomic::Ordering::Relaxed), 800);
        handle_watch_stream_error("repository", "429 TooManyRequests", &backoff, 1000).await;
        assert_eq!(backoff.load(std::sync::atomic::Ordering::Relaxed), 1000);
    }
}
