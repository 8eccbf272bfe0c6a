//! Aggregation metrics on the `metrics` facade.
//!
//! The library only records; installing an exporter is up to the embedding
//! application.
//!
//! # Example
//!
//! ```rust,no_run
//! use allend_core::telemetry::metrics::{AggregationMetrics, describe_metrics};
//!
//! describe_metrics();
//! AggregationMetrics::started("checkout");
//! ```

use std::sync::Once;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::aggregate::Verdict;

static DESCRIBE: Once = Once::new();

/// Register descriptions for every metric this crate emits. Idempotent.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!("allend_aggregations_total", "Total number of aggregations started");
        describe_counter!(
            "allend_completions_total",
            "Operation completions by outcome (success, failure)"
        );
        describe_counter!("allend_settlements_total", "Aggregation settlements by verdict");
        describe_histogram!(
            "allend_settlement_duration_seconds",
            "Time from start to settlement in seconds"
        );
        describe_counter!(
            "allend_residual_failures_total",
            "Failures arriving after settlement, by whether a handler observed them"
        );
        describe_counter!("allend_errors_total", "Total number of crate errors by code");
    });
}

/// Counters for the aggregation lifecycle.
pub struct AggregationMetrics;

impl AggregationMetrics {
    pub fn started(label: &str) {
        counter!("allend_aggregations_total", "label" => label.to_string()).increment(1);
    }

    pub fn completion(label: &str, succeeded: bool) {
        let outcome = if succeeded { "success" } else { "failure" };
        counter!(
            "allend_completions_total",
            "label" => label.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    /// Record a settlement and how long it took.
    pub fn settled(label: &str, verdict: &Verdict, elapsed: Duration) {
        counter!(
            "allend_settlements_total",
            "label" => label.to_string(),
            "verdict" => verdict.label(),
        )
        .increment(1);

        histogram!(
            "allend_settlement_duration_seconds",
            "label" => label.to_string(),
            "verdict" => verdict.label(),
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn residual(label: &str, observed: bool) {
        counter!(
            "allend_residual_failures_total",
            "label" => label.to_string(),
            "observed" => observed.to_string(),
        )
        .increment(1);
    }
}
