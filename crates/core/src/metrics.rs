//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Crucible (pipelines started and finished, items emitted)
//! - Stages (retry attempts, checkpointed positions)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

// =============================================================================
// Crucible Metrics
// =============================================================================

/// Items delivered to the crucible, by pipeline.
pub static ITEMS_EMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "alembic_items_emitted_total",
            "Total items emitted by running pipelines",
        ),
        &["pipeline"],
    )
    .expect("metric definition is valid")
});

/// Pipelines started.
pub static PIPELINES_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "alembic_pipelines_started_total",
        "Total pipelines started",
    )
    .expect("metric definition is valid")
});

/// Pipelines finished by result.
pub static PIPELINES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "alembic_pipelines_finished_total",
            "Total pipelines finished",
        ),
        &["result"], // "completed", "failed", "cancelled"
    )
    .expect("metric definition is valid")
});

// =============================================================================
// Stage Metrics
// =============================================================================

/// Upstream re-subscriptions performed by retry stages.
pub static RETRY_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "alembic_retry_attempts_total",
        "Total retry attempts after a failure",
    )
    .expect("metric definition is valid")
});

/// Positions written to the position store.
pub static POSITIONS_SAVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "alembic_positions_saved_total",
        "Total stream positions checkpointed",
    )
    .expect("metric definition is valid")
});

/// Returns all core metrics for registration with a Prometheus registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Crucible
        Box::new(ITEMS_EMITTED.clone()),
        Box::new(PIPELINES_STARTED.clone()),
        Box::new(PIPELINES_FINISHED.clone()),
        // Stages
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(POSITIONS_SAVED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        ITEMS_EMITTED.with_label_values(&["metrics-test"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "alembic_items_emitted_total"));
    }
}
