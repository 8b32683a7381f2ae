//! The HTTP status surface: Prometheus metrics, a JSON status document, and a
//! small embedded dashboard.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::DnsError;
use crate::store::{AnswerSet, RecordStore};

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: RecordStore,
    metrics: Option<PrometheusHandle>,
}

/// Status document returned by `/api/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    generated_at: String,
    domains: Vec<DomainStatus>,
}

#[derive(Debug, Serialize)]
struct DomainStatus {
    domain: String,
    ips: Vec<String>,
    last_update: String,
    config: ConfigView,
}

#[derive(Debug, Serialize)]
struct ConfigView {
    domain: String,
    cidr: Vec<String>,
    sni: String,
    timeout: String,
    port: u16,
    path: String,
    status_code: u16,
    sample_min: usize,
    sample_max: usize,
    sample_chance: f64,
    http_only: bool,
    result_limit: usize,
}

/// Serve the status surface on `addr` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    config: Arc<Config>,
    store: RecordStore,
    metrics: Option<PrometheusHandle>,
    cancel: CancellationToken,
) -> Result<(), DnsError> {
    let state = AppState {
        config,
        store,
        metrics,
    };
    let app = Router::new()
        .route("/", get(dashboard))
        .route("/metrics", get(render_metrics))
        .route("/api/status", get(api_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "http server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(build_status(&state.config, state.store.snapshot()))
}

fn build_status(config: &Config, snapshot: HashMap<String, AnswerSet>) -> StatusResponse {
    let domains = config
        .domains
        .iter()
        .map(|domain| {
            let (ips, last_update) = match snapshot.get(&domain.domain) {
                Some(set) => (
                    set.ips.iter().map(|ip| ip.to_string()).collect(),
                    humantime::format_rfc3339(set.updated_at).to_string(),
                ),
                None => (Vec::new(), String::new()),
            };
            DomainStatus {
                domain: domain.domain.clone(),
                ips,
                last_update,
                config: ConfigView {
                    domain: domain.domain.clone(),
                    cidr: domain.cidrs.clone(),
                    sni: domain.sni.clone(),
                    timeout: humantime::format_duration(domain.timeout).to_string(),
                    port: domain.port,
                    path: domain.path.clone(),
                    status_code: domain.status_code,
                    sample_min: domain.sample_min,
                    sample_max: domain.sample_max,
                    sample_chance: domain.sample_chance,
                    http_only: domain.http_only,
                    result_limit: domain.result_limit,
                },
            }
        })
        .collect();

    StatusResponse {
        generated_at: humantime::format_rfc3339(SystemTime::now()).to_string(),
        domains,
    }
}
