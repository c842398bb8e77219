//! Integration tests for the agent API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use vwd_agent::api::{create_router, serve, AppState};
use vwd_lib::{
    health::{components, HealthRegistry},
    DaemonMetrics, Prediction, PredictionBackend, VwError,
};

/// Backend answering `0.5 <line length>` for every request line
#[derive(Default)]
struct StubBackend {
    broken: bool,
    requests: Mutex<Vec<String>>,
    dumps: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl PredictionBackend for StubBackend {
    async fn predict(&self, requests: &[String]) -> vwd_lib::Result<Vec<Prediction>> {
        if self.broken {
            return Err(VwError::PoolClosed {
                addr: "127.0.0.1:26542".to_string(),
            });
        }
        self.requests.lock().unwrap().extend_from_slice(requests);
        Ok(requests
            .iter()
            .map(|line| Prediction {
                value: 0.5,
                tag: line.len().to_string(),
            })
            .collect())
    }

    async fn dump_model(&self, path: &Path) -> vwd_lib::Result<()> {
        if self.broken {
            return Err(VwError::PoolClosed {
                addr: "127.0.0.1:26542".to_string(),
            });
        }
        self.dumps.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn active_port(&self) -> u16 {
        26543
    }
}

async fn setup_test_app(
    backend: StubBackend,
    dump_path: Option<&str>,
) -> (Router, Arc<AppState>, Arc<StubBackend>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DAEMON).await;
    health_registry.register(components::MODEL_WATCHER).await;

    let backend = Arc::new(backend);
    let state = Arc::new(AppState::new(
        backend.clone(),
        health_registry,
        dump_path.map(PathBuf::from),
    ));
    let router = create_router(state.clone());

    (router, state, backend)
}

async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_predict_returns_one_prediction_per_line() {
    let (app, _state, backend) = setup_test_app(StubBackend::default(), None).await;

    let (status, body) = send(app, "POST", "/predict", "1 |f a\n\n0 'x |f bb\n").await;

    assert_eq!(status, StatusCode::OK);
    let predictions: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(predictions.as_array().unwrap().len(), 2);
    assert_eq!(predictions[0]["value"], 0.5);
    assert_eq!(predictions[0]["tag"], "6");
    assert_eq!(predictions[1]["tag"], "10");
    assert_eq!(
        *backend.requests.lock().unwrap(),
        vec!["1 |f a".to_string(), "0 'x |f bb".to_string()]
    );
}

#[tokio::test]
async fn test_predict_rejects_empty_body() {
    let (app, _state, backend) = setup_test_app(StubBackend::default(), None).await;

    let (status, body) = send(app, "POST", "/predict", "\n  \n").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].is_string());
    assert!(backend.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_predict_maps_daemon_errors_to_bad_gateway() {
    let broken = StubBackend {
        broken: true,
        ..Default::default()
    };
    let (app, _state, _backend) = setup_test_app(broken, None).await;

    let (status, body) = send(app, "POST", "/predict", "1 |f a\n").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].as_str().unwrap().contains("127.0.0.1:26542"));
}

#[tokio::test]
async fn test_dump_uses_configured_path() {
    let (app, _state, backend) =
        setup_test_app(StubBackend::default(), Some("/models/ctr.vw")).await;

    let (status, _) = send(app, "POST", "/dump", "").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        *backend.dumps.lock().unwrap(),
        vec![PathBuf::from("/models/ctr.vw")]
    );
}

#[tokio::test]
async fn test_dump_with_explicit_path() {
    let (app, _state, backend) =
        setup_test_app(StubBackend::default(), Some("/models/ctr.vw")).await;

    let (status, body) = send(app, "POST", "/dump", r#"{"path": "/backup/ctr.vw"}"#).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["path"], "/backup/ctr.vw");
    assert_eq!(
        *backend.dumps.lock().unwrap(),
        vec![PathBuf::from("/backup/ctr.vw")]
    );
}

#[tokio::test]
async fn test_dump_without_any_path_is_rejected() {
    let (app, _state, _backend) = setup_test_app(StubBackend::default(), None).await;

    let (status, _) = send(app.clone(), "POST", "/dump", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app, "POST", "/dump", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_reports_active_port() {
    let (app, state, _backend) = setup_test_app(StubBackend::default(), None).await;
    state.health_registry.set_ready(true).await;

    let (status, body) = send(app, "GET", "/status", "").await;

    assert_eq!(status, StatusCode::OK);
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["active_port"], 26543);
    assert_eq!(reply["status"], "healthy");
    assert_eq!(reply["ready"], true);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _backend) = setup_test_app(StubBackend::default(), None).await;

    state
        .health_registry
        .set_degraded(components::MODEL_WATCHER, "model file missing")
        .await;

    let (status, body) = send(app, "GET", "/healthz", "").await;

    // Degraded still returns 200 (serving)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert!(health["components"]["daemon"].is_object());
    assert!(health["components"]["model_watcher"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _backend) = setup_test_app(StubBackend::default(), None).await;

    state
        .health_registry
        .set_unhealthy(components::DAEMON, "daemon stopped responding")
        .await;

    let (status, body) = send(app, "GET", "/healthz", "").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_launch() {
    let (app, state, _backend) = setup_test_app(StubBackend::default(), None).await;

    let (status, body) = send(app.clone(), "GET", "/readyz", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, _) = send(app, "GET", "/readyz", "").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _backend) = setup_test_app(StubBackend::default(), None).await;

    let metrics = DaemonMetrics::new();
    metrics.observe_request(0.002, 3);
    metrics.set_active_port(26543);
    metrics.set_live_workers(11);

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
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("vwd_request_latency_seconds_bucket"));
    assert!(metrics_text.contains("vwd_predictions_total"));
    assert!(metrics_text.contains("vwd_active_port 26543"));
    assert!(metrics_text.contains("vwd_live_workers 11"));
}

#[tokio::test]
async fn test_serve_answers_until_shutdown() {
    let (_app, state, _backend) = setup_test_app(StubBackend::default(), None).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let server = tokio::spawn(serve(listener, state, shutdown_rx));

    let predictions: Vec<Prediction> = reqwest::Client::new()
        .post(format!("http://{}/predict", addr))
        .body("1 |f a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(predictions.len(), 1);

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
