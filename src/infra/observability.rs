//! Logging and Prometheus metrics setup.
//!
//! Metrics are rendered on demand through GET /metrics; no exporter listener
//! is started.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok(),
    }
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!("jobs_enqueued_total", "Job invocations enqueued, by job name");
    metrics::describe_counter!("jobs_claimed_total", "Job invocations claimed by a worker");
    metrics::describe_counter!("jobs_succeeded_total", "Job invocations that succeeded");
    metrics::describe_counter!("jobs_failed_total", "Job invocations that failed");
    metrics::describe_counter!(
        "jobs_expired_total",
        "Reclaimed job invocations failed instead of re-run"
    );
    metrics::describe_histogram!("job_duration_seconds", "Handler run time per invocation");
    metrics::describe_counter!(
        "pipeline_step_failures_total",
        "Pipeline failures, by pipeline and step"
    );
    metrics::describe_counter!(
        "wallet_aggregation_failures_total",
        "Wallets that could not be imported during aggregation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init_is_idempotent() {
        init_tracing(LogFormat::Pretty);
        assert!(!init_tracing(LogFormat::Json));
    }
}
