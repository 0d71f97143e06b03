//! # Release Metrics
//!
//! Metrics for jobs run by the release worker pool, labelled by job class.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec};
use std::sync::LazyLock;

static RELEASE_JOBS_STARTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "component_controller_release_jobs_started_total",
            "Total number of release jobs started",
        ),
        &["class"],
    )
    .expect("Failed to create RELEASE_JOBS_STARTED_TOTAL metric - this should never happen")
});

static RELEASE_JOBS_CANCELLED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "component_controller_release_jobs_cancelled_total",
            "Total number of release jobs cancelled as stale",
        ),
        &["class"],
    )
    .expect("Failed to create RELEASE_JOBS_CANCELLED_TOTAL metric - this should never happen")
});

static RELEASE_JOBS_FINISHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "component_controller_release_jobs_finished_total",
            "Total number of release jobs finished, by outcome",
        ),
        &["class", "outcome"],
    )
    .expect("Failed to create RELEASE_JOBS_FINISHED_TOTAL metric - this should never happen")
});

static RELEASE_JOBS_ACTIVE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "component_controller_release_jobs_active",
            "Release jobs currently in flight",
        ),
        &["class"],
    )
    .expect("Failed to create RELEASE_JOBS_ACTIVE metric - this should never happen")
});

static RELEASE_JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "component_controller_release_job_duration_seconds",
            "Duration of release jobs in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["class"],
    )
    .expect("Failed to create RELEASE_JOB_DURATION metric - this should never happen")
});

/// Register release metrics with the registry
pub(crate) fn register_release_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RELEASE_JOBS_STARTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELEASE_JOBS_CANCELLED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELEASE_JOBS_FINISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELEASE_JOBS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(RELEASE_JOB_DURATION.clone()))?;
    Ok(())
}

pub fn increment_release_jobs_started(class: &str) {
    RELEASE_JOBS_STARTED_TOTAL.with_label_values(&[class]).inc();
    RELEASE_JOBS_ACTIVE.with_label_values(&[class]).inc();
}

pub fn increment_release_jobs_cancelled(class: &str) {
    RELEASE_JOBS_CANCELLED_TOTAL.with_label_values(&[class]).inc();
}

/// Record a finished job; cancelled jobs are only counted by [`increment_release_jobs_cancelled`]
pub fn observe_release_job(class: &str, outcome: &str, duration: f64) {
    RELEASE_JOBS_FINISHED_TOTAL
        .with_label_values(&[class, outcome])
        .inc();
    RELEASE_JOB_DURATION.with_label_values(&[class]).observe(duration);
}

/// A job left the in-flight table, whatever its outcome
pub fn decrement_release_jobs_active(class: &str) {
    RELEASE_JOBS_ACTIVE.with_label_values(&[class]).dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_and_finished_jobs() {
        let started = RELEASE_JOBS_STARTED_TOTAL.with_label_values(&["rollback"]).get();
        let finished = RELEASE_JOBS_FINISHED_TOTAL
            .with_label_values(&["rollback", "success"])
            .get();
        increment_release_jobs_started("rollback");
        observe_release_job("rollback", "success", 3.0);
        assert_eq!(
            RELEASE_JOBS_STARTED_TOTAL.with_label_values(&["rollback"]).get(),
            started + 1u64
        );
        assert_eq!(
            RELEASE_JOBS_FINISHED_TOTAL
                .with_label_values(&["rollback", "success"])
                .get(),
            finished + 1u64
        );
    }
}
