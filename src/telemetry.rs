//! Metrics for turns, saves and the streaming endpoint
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder the macros are no-ops; build with the `prometheus` feature and
//! call [`init_metrics_exporter`] to expose them.

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Count one request to the backend's streaming endpoint
pub fn record_stream_request() {
    increment_counter!("palaver_stream_requests_total");
}

/// Instrumentation for a single turn
///
/// Creating one bumps the started counter and the active gauge. Exactly one
/// outcome is recorded; later calls are ignored. Dropping an unrecorded
/// tracker still releases the active gauge.
///
/// # Examples
///
/// ```
/// use palaver::telemetry::TurnMetrics;
///
/// let metrics = TurnMetrics::new("llama3.2:latest");
/// metrics.record_outcome("completed", 12);
/// ```
#[derive(Debug)]
pub struct TurnMetrics {
    model: String,
    start: Instant,
    recorded: Cell<bool>,
}

impl TurnMetrics {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        increment_counter!("palaver_turns_started_total", "model" => model.clone());
        increment_gauge!("palaver_turns_active", 1.0);

        Self {
            model,
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Record how the turn ended and how many deltas it streamed
    pub fn record_outcome(&self, outcome: &'static str, deltas: usize) {
        if self.recorded.get() {
            return;
        }
        self.recorded.set(true);

        increment_counter!(
            "palaver_turns_finished_total",
            "model" => self.model.clone(),
            "outcome" => outcome
        );
        histogram!(
            "palaver_turn_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "outcome" => outcome
        );
        histogram!("palaver_turn_deltas", deltas as f64, "outcome" => outcome);
        decrement_gauge!("palaver_turns_active", 1.0);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TurnMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            decrement_gauge!("palaver_turns_active", 1.0);
        }
    }
}

/// Record one store operation drained from a save queue
///
/// `operation` is `"save"` or `"delete"`.
pub fn record_store_write(operation: &'static str, ok: bool, elapsed: Duration) {
    let result = if ok { "ok" } else { "failed" };
    increment_counter!(
        "palaver_store_writes_total",
        "operation" => operation,
        "result" => result
    );
    histogram!(
        "palaver_store_write_duration_seconds",
        elapsed.as_secs_f64(),
        "operation" => operation
    );
}

/// Install the Prometheus exporter when built with the `prometheus` feature
///
/// A no-op otherwise.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_metrics_records_once() {
        let metrics = TurnMetrics::new("m");
        metrics.record_outcome("completed", 3);
        metrics.record_outcome("errored", 0);
        assert!(metrics.recorded.get());
    }

    #[test]
    fn test_drop_without_outcome() {
        let metrics = TurnMetrics::new("m");
        assert!(!metrics.recorded.get());
        drop(metrics);
    }

    #[test]
    fn test_elapsed_is_small() {
        let metrics = TurnMetrics::new("m");
        assert!(metrics.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_store_write_and_exporter_do_not_panic() {
        record_store_write("save", true, Duration::from_millis(2));
        record_store_write("delete", false, Duration::from_millis(1));
        record_stream_request();
        init_metrics_exporter();
    }
}
