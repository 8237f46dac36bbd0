//! Health and Prometheus endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

/// Which backends this process runs on, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct Backends {
    pub storage: &'static str,
    pub bus: &'static str,
    pub locking_strategy: &'static str,
}

pub struct SystemState {
    pub backends: Backends,
    pub metrics: PrometheusHandle,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub backends: Backends,
}

/// GET /health
pub async fn health(State(state): State<Arc<SystemState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backends: state.backends.clone(),
    })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<SystemState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
