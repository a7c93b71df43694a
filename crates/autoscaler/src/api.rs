//! HTTP surface of the autoscaler
//!
//! Three probe-style routes plus a status route:
//! - `/healthz` and `/readyz` report the component registry the loop feeds
//! - `/metrics` renders the Prometheus registry
//! - `/status` returns the last iteration's per-ASG decisions

use autoscaler_lib::driver::StatusFeed;
use autoscaler_lib::health::{ComponentStatus, HealthRegistry};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    pub status: StatusFeed,
}

/// Liveness: only a fully unhealthy component set takes the process out of
/// rotation, degraded iterations keep serving.
async fn healthz(State(state): State<AppState>) -> Response {
    let health = state.health.health().await;
    let code = match health.status {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(health)).into_response()
}

async fn readyz(State(state): State<AppState>) -> Response {
    let readiness = state.health.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness)).into_response()
}

/// The last completed iteration: current → required → target per ASG, with
/// the partition sizing behind each decision. 404 until the first iteration
/// lands.
async fn status(State(state): State<AppState>) -> Response {
    match state.status.latest().await {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::NOT_FOUND, "no iteration completed yet").into_response(),
    }
}

async fn metrics() -> Response {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Serving health, status and metrics");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
