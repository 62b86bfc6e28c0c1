//! Prometheus metrics for the release operator
//!
//! # Exported metrics
//! - `release_reconcile_duration_seconds` (histogram): pass duration labeled by controller.
//! - `release_reconcile_errors_total` (counter): failed attempts labeled by controller and kind.
//! - `release_reconcile_retries_total` (counter): retried attempts labeled by controller.
//! - `release_reconcile_actions_total` (counter): store mutations labeled by controller and action.
//! - `release_desired_components` (gauge): size of the desired set seen by the last pass.
//!
//! Counters are registered without the `_total` suffix; the encoder adds it.
//! No endpoint is served by this crate; [`encode_metrics`] renders the
//! registry in the OpenMetrics text format for whoever scrapes it.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "appinstall"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error category, see `Error::metric_kind`
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ActionLabels {
    pub controller: String,
    /// "create", "update" or "delete"
    pub action: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_RETRIES_TOTAL: Lazy<Family<ReconcileLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_ACTIONS_TOTAL: Lazy<Family<ActionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static DESIRED_COMPONENTS: Lazy<Family<ReconcileLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "release_reconcile_duration_seconds",
        "Duration of reconcile passes in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "release_reconcile_errors",
        "Total number of failed reconcile attempts",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "release_reconcile_retries",
        "Total number of retried reconcile attempts",
        RECONCILE_RETRIES_TOTAL.clone(),
    );
    registry.register(
        "release_reconcile_actions",
        "Total number of child resources created, updated or deleted",
        RECONCILE_ACTIONS_TOTAL.clone(),
    );
    registry.register(
        "release_desired_components",
        "Number of components in the desired set of the last pass",
        DESIRED_COMPONENTS.clone(),
    );

    registry
});

fn reconcile_labels(controller: &str) -> ReconcileLabels {
    ReconcileLabels {
        controller: controller.to_string(),
    }
}

/// Record the duration of one reconcile pass (all attempts included).
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&reconcile_labels(controller))
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_reconcile_retry(controller: &str) {
    RECONCILE_RETRIES_TOTAL
        .get_or_create(&reconcile_labels(controller))
        .inc();
}

/// Add `count` store mutations of one action type
pub fn add_reconcile_actions(controller: &str, action: &str, count: usize) {
    if count == 0 {
        return;
    }
    let labels = ActionLabels {
        controller: controller.to_string(),
        action: action.to_string(),
    };
    RECONCILE_ACTIONS_TOTAL
        .get_or_create(&labels)
        .inc_by(count as u64);
}

pub fn set_desired_components(controller: &str, count: usize) {
    DESIRED_COMPONENTS
        .get_or_create(&reconcile_labels(controller))
        .set(count as i64);
}

/// Render the registry in the OpenMetrics text format.
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_initialization() {
        let _registry = &*REGISTRY;
    }

    #[test]
    fn test_encoded_output_contains_recorded_series() {
        observe_reconcile_duration_seconds("metrics-test", 0.25);
        inc_reconcile_error("metrics-test", "transient");
        inc_reconcile_retry("metrics-test");
        add_reconcile_actions("metrics-test", "create", 2);
        set_desired_components("metrics-test", 7);

        let text = encode_metrics().unwrap();
        assert!(text.contains("release_reconcile_duration_seconds"));
        let errors = r#"release_reconcile_errors_total{controller="metrics-test",kind="transient"} 1"#;
        let actions = r#"release_reconcile_actions_total{controller="metrics-test",action="create"} 2"#;
        assert!(text.contains(errors));
        assert!(text.contains(actions));
        assert!(text.contains(r#"release_desired_components{controller="metrics-test"} 7"#));
    }

    #[test]
    fn test_zero_actions_are_not_recorded() {
        add_reconcile_actions("metrics-zero", "delete", 0);
        let text = encode_metrics().unwrap();
        assert!(!text.contains(r#"controller="metrics-zero""#));
    }
}
