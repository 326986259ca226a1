//! Prometheus metrics for job runs and external calls.
//!
//! ```rust,ignore
//! use sweeper_core::telemetry::JobMetrics;
//!
//! JobMetrics::record_run(&result);
//! JobMetrics::record_retry("groq", "rate_limited");
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::jobs::runner::RunResult;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for run durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

// Runs take from milliseconds (nothing to do) to hours (full backfill).
fn default_duration_buckets() -> Vec<f64> {
    vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 10800.0]
}

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        tracing::info!("Metrics disabled");
        return Ok(());
    }

    let addr: SocketAddr = config.endpoint.parse()?;
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;
    builder.install()?;

    register_metric_descriptions();

    tracing::info!(endpoint = %config.endpoint, "Metrics initialized");
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "sweeper_job_items_total",
        "Items processed by job and outcome"
    );
    describe_counter!("sweeper_job_runs_total", "Job runs by final status");
    describe_histogram!(
        "sweeper_job_run_duration_seconds",
        "Wall-clock duration of a job run"
    );
    describe_counter!(
        "sweeper_external_retries_total",
        "Retried external calls by service and retry class"
    );
    describe_counter!("sweeper_errors_total", "Run-level errors by code");
}

/// Recorder for job-level metrics.
pub struct JobMetrics;

impl JobMetrics {
    /// Publish the counters of a finished (or cancelled) run.
    pub fn record_run(result: &RunResult) {
        let job = result.job.clone();

        for (outcome, count) in [
            ("succeeded", result.succeeded),
            ("failed", result.failed),
            ("skipped", result.skipped),
        ] {
            if count > 0 {
                counter!(
                    "sweeper_job_items_total",
                    "job" => job.clone(),
                    "outcome" => outcome,
                )
                .increment(count);
            }
        }

        counter!(
            "sweeper_job_runs_total",
            "job" => job.clone(),
            "status" => result.status(),
        )
        .increment(1);

        histogram!("sweeper_job_run_duration_seconds", "job" => job)
            .record(result.duration().as_secs_f64());
    }

    /// A run that aborted before producing a result.
    pub fn record_run_error(job: &str) {
        counter!(
            "sweeper_job_runs_total",
            "job" => job.to_string(),
            "status" => "error",
        )
        .increment(1);
    }

    pub fn record_retry(service: &str, class: &'static str) {
        counter!(
            "sweeper_external_retries_total",
            "service" => service.to_string(),
            "class" => class,
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "0.0.0.0:9090");
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            endpoint: "not an address".to_string(),
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        let result = RunResult::new("embedding_backfill", false);
        JobMetrics::record_run(&result);
        JobMetrics::record_retry("voyage", "transient");
        JobMetrics::record_run_error("cleanup");
    }
}
