//! HTTP API for predictions, model dumps, health checks and Prometheus metrics

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use vwd_lib::{
    health::{ComponentStatus, HealthRegistry},
    PredictionBackend,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn PredictionBackend>,
    pub health_registry: HealthRegistry,
    /// Target for `POST /dump` requests that name no path
    pub dump_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn PredictionBackend>,
        health_registry: HealthRegistry,
        dump_path: Option<PathBuf>,
    ) -> Self {
        Self {
            backend,
            health_registry,
            dump_path,
        }
    }
}

/// Body of `POST /dump`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DumpRequest {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Body of `GET /status`
#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub active_port: u16,
    pub status: ComponentStatus,
    pub ready: bool,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// One prediction per non-empty request line, in request order
async fn predict(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let requests: Vec<String> = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    if requests.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "request body has no example lines")
            .into_response();
    }

    match state.backend.predict(&requests).await {
        Ok(predictions) => (StatusCode::OK, Json(predictions)).into_response(),
        Err(e) => {
            warn!(error = %e, requests = requests.len(), "Prediction failed");
            error_body(StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Ask the daemon to save its model
async fn dump(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        DumpRequest::default()
    } else {
        match serde_json::from_slice::<DumpRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    let Some(path) = request.path.or_else(|| state.dump_path.clone()) else {
        return error_body(StatusCode::BAD_REQUEST, "no dump path given or configured");
    };

    match state.backend.dump_model(&path).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "path": path.display().to_string() })),
        ),
        Err(e) => error_body(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// Active port plus overall health, for operators
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let readiness = state.health_registry.readiness().await;

    Json(StatusResponse {
        active_port: state.backend.active_port().await,
        status: health.status,
        ready: readiness.ready,
    })
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/dump", post(dump))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` fires
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = %listener.local_addr()?, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
