//! Integration tests for the autoscaler HTTP surface
//!
//! The router is rebuilt here in the same shape as `src/api.rs` (binary
//! modules are not importable from integration tests).

use autoscaler_lib::decision::{AsgDecision, DecisionReason};
use autoscaler_lib::driver::{IterationStatus, StatusFeed};
use autoscaler_lib::health::{components, ComponentStatus, HealthRegistry};
use autoscaler_lib::observability::ScalerMetrics;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tower::ServiceExt;

#[derive(Clone)]
struct AppState {
    health: HealthRegistry,
    status: StatusFeed,
}

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

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn setup() -> (Router, AppState) {
    let health = HealthRegistry::new();
    health.register(components::ORCHESTRATOR).await;
    health.register(components::CLOUD).await;
    health.register(components::DECISION_LOOP).await;

    let state = AppState {
        health,
        status: StatusFeed::new(),
    };
    (router(state.clone()), state)
}

async fn get_status(app: Router, uri: &str) -> StatusCode {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_healthz_follows_the_component_registry() {
    let (app, state) = setup().await;
    assert_eq!(get_status(app.clone(), "/healthz").await, StatusCode::OK);

    state
        .health
        .set_unhealthy(components::ORCHESTRATOR, "snapshot failed")
        .await;
    assert_eq!(
        get_status(app, "/healthz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_readyz_tracks_initialization() {
    let (app, state) = setup().await;
    assert_eq!(
        get_status(app.clone(), "/readyz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );

    state.health.set_ready(true).await;
    assert_eq!(get_status(app, "/readyz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_status_serves_the_last_iteration() {
    let (app, state) = setup().await;
    assert_eq!(
        get_status(app.clone(), "/status").await,
        StatusCode::NOT_FOUND
    );

    state
        .status
        .publish(IterationStatus {
            completed_at: 1_700_000_000,
            applied: 1,
            failed: 0,
            decisions: vec![AsgDecision {
                asg: "workers".to_string(),
                current: 3,
                required: Some(4),
                target: 4,
                reason: DecisionReason::ScaleUp,
                partitions: vec![],
            }],
        })
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("\"asg\":\"workers\""));
    assert!(text.contains("\"reason\":\"scale_up\""));
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_autoscaler_series() {
    let (app, _state) = setup().await;
    ScalerMetrics::new().inc_iterations();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("autoscaler_iterations_total"));
}
