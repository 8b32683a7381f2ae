//! Telemetry setup for pharos-dns: tracing subscriber and the Prometheus
//! metrics recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::DnsError;

/// Initialize the tracing subscriber. `RUST_LOG` takes precedence; otherwise
/// `verbose` selects debug-level logging for this crate.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "pharos_dns=debug,info"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the global Prometheus metrics recorder and return its render
/// handle. Installing twice is a startup error.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, DnsError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| DnsError::Metrics(e.to_string()))
}
