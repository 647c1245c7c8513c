// src/api/mod.rs — HTTP API over the iteration controller

pub mod auth;
pub mod handlers;
pub mod types;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use tower_http::cors::CorsLayer;

use crate::core::run_config::ConfigStore;
use crate::core::IterationController;
use crate::infra::config::ApiConfig;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: IterationController,
    pub config_store: ConfigStore,
    pub token: Option<String>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
        ])
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/config/validate", post(handlers::validate_config))
        .route(
            "/api/v1/runs",
            post(handlers::create_run).get(handlers::list_runs),
        )
        .route("/api/v1/runs/{id}", get(handlers::get_run))
        .route(
            "/api/v1/runs/{id}/iterations",
            post(handlers::start_iteration),
        )
        .route("/api/v1/runs/{id}/labels", post(handlers::submit_labels))
        .route("/api/v1/runs/{id}/stop", post(handlers::stop_run))
        .route("/api/v1/runs/{id}/rounds", get(handlers::list_rounds))
        .route("/api/v1/runs/{id}/rounds/{round}", get(handlers::get_round))
        .route(
            "/api/v1/runs/{id}/rounds/{round}/metrics",
            get(handlers::get_metrics),
        )
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn start_server(
    config: &ApiConfig,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);

    let router = build_router(state);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_config::RunConfig;
    use crate::core::types::{InputSnapshot, SelectedSample, WorkflowOutcome, WorkflowTiming};
    use crate::core::workflow::{CancelSignal, WorkflowRunner};
    use crate::infra::config::WebhookConfig;
    use crate::infra::errors::WorkflowError;
    use crate::store;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Selects the first `batch_size` sample ids of a fixed pool.
    struct FixedRunner;

    #[async_trait]
    impl WorkflowRunner for FixedRunner {
        async fn execute(
            &self,
            round_index: u32,
            cfg: &RunConfig,
            _input: &InputSnapshot,
            _cancel: CancelSignal,
        ) -> Result<WorkflowOutcome, WorkflowError> {
            let now = chrono::Utc::now();
            Ok(WorkflowOutcome {
                selected_samples: (0..cfg.batch_size)
                    .map(|i| SelectedSample::id(format!("r{round_index}-s{i}")))
                    .collect(),
                model_artifact: Some(format!("/models/round_{round_index}.pkl")),
                artifacts: Default::default(),
                metrics: [("accuracy".to_string(), 0.5)].into_iter().collect(),
                timing: WorkflowTiming {
                    started_at: now,
                    finished_at: now,
                    duration_ms: 0,
                    reported_secs: None,
                },
            })
        }
    }

    fn test_state(token: Option<&str>) -> ApiState {
        let store = store::open_in_memory().unwrap();
        let (handle, _join) = store::spawn_store_server(store);
        ApiState {
            controller: IterationController::new(
                Arc::new(FixedRunner),
                handle,
                WebhookConfig::default(),
            ),
            config_store: ConfigStore::default(),
            token: token.map(str::to_string),
        }
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn run_config_json() -> serde_json::Value {
        serde_json::json!({
            "project_id": "demo",
            "dataset": "pool.csv",
            "query_strategy": "uncertainty",
            "batch_size": 2,
            "max_rounds": 2,
            "workflow": { "definition": "al.cwl" }
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_required_when_token_set() {
        let app = build_router(test_state(Some("s3cret")));
        let req = Request::builder()
            .uri("/api/v1/runs")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/runs")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validate_config() {
        let app = build_router(test_state(None));

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/config/validate",
                run_config_json(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["config"]["workflow"]["runner"], "cwltool");

        let resp = app
            .oneshot(json_request(
                "POST",
                "/api/v1/config/validate",
                serde_json::json!({ "format": "toml", "text": "dataset = \"d\"" }),
            ))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["valid"], false);
        assert!(body["error"].as_str().unwrap().contains("workflow"));
    }

    #[tokio::test]
    async fn test_create_run_rejects_invalid_config() {
        let app = build_router(test_state(None));
        let mut config = run_config_json();
        config["batch_size"] = serde_json::json!(0);

        let resp = app
            .oneshot(json_request("POST", "/api/v1/runs", config))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["kind"], "invalid_config");
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .uri("/api/v1/runs/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["kind"], "unknown_run");
    }

    #[tokio::test]
    async fn test_run_lifecycle_over_http() {
        let app = build_router(test_state(None));

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/runs", run_config_json()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        let run_id = created["run_id"].as_str().unwrap().to_string();

        // Wait for round 0 to reach AWAITING_LABELS
        let mut phase = String::new();
        for _ in 0..200 {
            let req = Request::builder()
                .uri(format!("/api/v1/runs/{run_id}"))
                .body(Body::empty())
                .unwrap();
            let body = body_json(app.clone().oneshot(req).await.unwrap()).await;
            phase = body["phase"]["phase"].as_str().unwrap_or_default().to_string();
            if phase == "awaiting_labels" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(phase, "awaiting_labels");

        // Wrong round → 409
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/runs/{run_id}/labels"),
                serde_json::json!({
                    "round": 3,
                    "labeled_samples": [{"sample_id": "r0-s0", "label": "cat"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // Partial labels for round 0
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/runs/{run_id}/labels"),
                serde_json::json!({
                    "iteration": 0,
                    "labeled_samples": [{"sample_id": "r0-s0", "label": "cat"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let status = body_json(resp).await;
        assert_eq!(status["samples_processed"], 1);
        assert_eq!(status["carried_forward"], 1);
        assert_eq!(status["next_round"], 1);

        let req = Request::builder()
            .uri(format!("/api/v1/runs/{run_id}/rounds/0/metrics"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["accuracy"], 0.5);

        let req = Request::builder()
            .uri(format!("/api/v1/runs/{run_id}/rounds/9"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Stop
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/runs/{run_id}/stop"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
