//! # Repository Metrics
//!
//! Metrics for repository index syncs and the Component writes they produce.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec};
use std::sync::LazyLock;

static REPOSITORY_SYNCS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "component_controller_repository_syncs_total",
            "Total number of repository index syncs, by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create REPOSITORY_SYNCS_TOTAL metric - this should never happen")
});

static REPOSITORY_SYNC_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "component_controller_repository_sync_duration_seconds",
            "Duration of repository index syncs in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["outcome"],
    )
    .expect("Failed to create REPOSITORY_SYNC_DURATION metric - this should never happen")
});

static COMPONENTS_CHANGED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "component_controller_components_changed_total",
            "Total number of Component writes, by change",
        ),
        &["change"],
    )
    .expect("Failed to create COMPONENTS_CHANGED_TOTAL metric - this should never happen")
});

/// Register repository metrics with the registry
pub(crate) fn register_repository_metrics() -> Result<()> {
    REGISTRY.register(Box::new(REPOSITORY_SYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REPOSITORY_SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(COMPONENTS_CHANGED_TOTAL.clone()))?;
    Ok(())
}

pub fn observe_repository_sync(outcome: &str, duration: f64) {
    REPOSITORY_SYNCS_TOTAL.with_label_values(&[outcome]).inc();
    REPOSITORY_SYNC_DURATION
        .with_label_values(&[outcome])
        .observe(duration);
}

pub fn increment_components_changed(created: usize, updated: usize, deprecated: usize) {
    for (change, count) in [
        ("created", created),
        ("updated", updated),
        ("deprecated", deprecated),
    ] {
        COMPONENTS_CHANGED_TOTAL
            .with_label_values(&[change])
            .inc_by(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_components_changed() {
        let before = COMPONENTS_CHANGED_TOTAL.with_label_values(&["updated"]).get();
        increment_components_changed(0, 2, 0);
        let after = COMPONENTS_CHANGED_TOTAL.with_label_values(&["updated"]).get();
        assert_eq!(after, before + 2u64);
    }
}
