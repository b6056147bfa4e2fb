//! Prometheus Metrics for Ingestion Runs
//!
//! Metrics include:
//! - records per dataset and outcome
//! - per-city fetch failures
//! - run duration (histogram)
//! - runs per dataset and status

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramOpts, HistogramVec, IntCounterVec,
    TextEncoder,
};
use tracing::error;

// ============================================
// METRIC DEFINITIONS
// ============================================

/// Record outcomes
pub const OUTCOME_INVALID: &str = "invalid";
pub const OUTCOME_STORE_ERROR: &str = "store_error";
pub const OUTCOME_CREATED: &str = "created";
pub const OUTCOME_UPDATED: &str = "updated";
pub const OUTCOME_UNCHANGED: &str = "unchanged";
pub const OUTCOME_EXISTING: &str = "existing";
pub const OUTCOME_CITY_CREATED: &str = "city_created";

/// Run statuses
pub const RUN_COMPLETED: &str = "completed";
pub const RUN_FAILED: &str = "failed";

static RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "weather_records_total",
        "Records and readings handled per dataset, by outcome",
        &["dataset", "outcome"]
    )
    .expect("Failed to create records_total metric")
});

static FETCH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "weather_fetch_failures_total",
        "Per-city fetches that failed",
        &["dataset"]
    )
    .expect("Failed to create fetch_failures metric")
});

static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "weather_runs_total",
        "Ingestion runs per dataset, by status",
        &["dataset", "status"]
    )
    .expect("Failed to create runs_total metric")
});

static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];
    register_histogram_vec!(
        HistogramOpts::new("weather_run_duration_seconds", "Duration of one ingestion run in seconds")
            .buckets(buckets),
        &["dataset"]
    )
    .expect("Failed to create run_duration metric")
});

// ============================================
// METRICS API
// ============================================

pub fn record_outcome(dataset: &str, outcome: &str, count: u64) {
    if count > 0 {
        RECORDS_TOTAL.with_label_values(&[dataset, outcome]).inc_by(count);
    }
}

pub fn record_fetch_failure(dataset: &str) {
    FETCH_FAILURES.with_label_values(&[dataset]).inc();
}

pub fn record_run(dataset: &str, status: &str) {
    RUNS_TOTAL.with_label_values(&[dataset, status]).inc();
}

pub fn record_run_duration(dataset: &str, secs: f64) {
    RUN_DURATION.with_label_values(&[dataset]).observe(secs);
}

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Observes a run's duration when dropped
pub struct RunTimer {
    dataset: &'static str,
    start: std::time::Instant,
}

impl RunTimer {
    pub fn new(dataset: &'static str) -> Self {
        Self {
            dataset,
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        record_run_duration(self.dataset, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        record_outcome("ow-daily", OUTCOME_CREATED, 3);
        record_fetch_failure("wb-current");
        record_run("ow-daily", RUN_COMPLETED);

        let metrics = gather_metrics();
        assert!(metrics.contains("weather_records_total"));
        assert!(metrics.contains("weather_fetch_failures_total"));
        assert!(metrics.contains("weather_runs_total"));
    }

    #[test]
    fn test_run_timer() {
        {
            let _timer = RunTimer::new("wb-cities");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let metrics = gather_metrics();
        assert!(metrics.contains("weather_run_duration_seconds"));
    }

    #[test]
    fn test_zero_counts_are_not_recorded() {
        record_outcome("metrics-test-dataset", OUTCOME_UPDATED, 0);
        assert!(!gather_metrics().contains("metrics-test-dataset"));
    }
}
