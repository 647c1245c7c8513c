// src/api/handlers.rs

use crate::api::{auth, types::*, ApiState};
use crate::core::run_config::{ConfigSource, RunConfig};
use crate::core::types::{
    Metrics, RoundArtifact, RoundStatus, RunHandle, RunStateSnapshot, RunSummary,
};
use crate::infra::errors::ConfigError;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

fn parse_body(state: &ApiState, body: RunConfigBody) -> Result<RunConfig, ConfigError> {
    match body {
        RunConfigBody::Text { format, text } => state
            .config_store
            .load_with_env(&ConfigSource::Inline { format, text }, |_| None),
        RunConfigBody::Document(value) => state.config_store.from_value(value),
    }
}

/// POST /api/v1/config/validate — Parse and validate a run config without starting it.
pub async fn validate_config(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RunConfigBody>,
) -> Result<Json<ValidationResponse>, ApiError> {
    auth::check_auth(&state, &headers)?;

    let response = match parse_body(&state, body) {
        Ok(config) => ValidationResponse {
            valid: true,
            config: Some(config),
            error: None,
        },
        Err(e) => ValidationResponse {
            valid: false,
            config: None,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/runs — Start a run; round 0 begins immediately.
pub async fn create_run(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RunConfigBody>,
) -> Result<(StatusCode, Json<RunCreatedResponse>), ApiError> {
    auth::check_auth(&state, &headers)?;

    let config = parse_body(&state, body).map_err(config_error)?;
    let run_id = state
        .controller
        .start_run(config)
        .await
        .map_err(controller_error)?;
    let snapshot = state.controller.status(&run_id).map_err(controller_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RunCreatedResponse {
            run_id,
            status: snapshot.status,
            phase: snapshot.phase,
            current_round: snapshot.current_round,
        }),
    ))
}

/// GET /api/v1/runs — All registered runs.
pub async fn list_runs(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    auth::check_auth(&state, &headers)?;
    Ok(Json(state.controller.list_runs()))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RunStateSnapshot>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let snapshot = state
        .controller
        .status(&RunHandle::from(id))
        .map_err(controller_error)?;
    Ok(Json(snapshot))
}

/// POST /api/v1/runs/{id}/iterations — Begin the next round of an idle run.
pub async fn start_iteration(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RoundStatus>), ApiError> {
    auth::check_auth(&state, &headers)?;
    let status = state
        .controller
        .start_iteration(&RunHandle::from(id))
        .await
        .map_err(controller_error)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// POST /api/v1/runs/{id}/labels
pub async fn submit_labels(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<LabelSubmission>,
) -> Result<Json<RoundStatus>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let status = state
        .controller
        .submit_labels(&RunHandle::from(id), body.round, body.labeled_samples)
        .await
        .map_err(controller_error)?;
    Ok(Json(status))
}

/// POST /api/v1/runs/{id}/stop
pub async fn stop_run(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RunStateSnapshot>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let snapshot = state
        .controller
        .stop_run(&RunHandle::from(id))
        .await
        .map_err(controller_error)?;
    Ok(Json(snapshot))
}

/// GET /api/v1/runs/{id}/rounds
pub async fn list_rounds(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<RoundArtifact>>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let rounds = state
        .controller
        .list_rounds(&RunHandle::from(id))
        .await
        .map_err(controller_error)?;
    Ok(Json(rounds))
}

/// GET /api/v1/runs/{id}/rounds/{round}
pub async fn get_round(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, round)): Path<(String, u32)>,
) -> Result<Json<RoundArtifact>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let artifact = state
        .controller
        .get_round(&RunHandle::from(id), round)
        .await
        .map_err(controller_error)?;
    Ok(Json(artifact))
}

/// GET /api/v1/runs/{id}/rounds/{round}/metrics
pub async fn get_metrics(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, round)): Path<(String, u32)>,
) -> Result<Json<Metrics>, ApiError> {
    auth::check_auth(&state, &headers)?;
    let metrics = state
        .controller
        .performance(&RunHandle::from(id), round)
        .await
        .map_err(controller_error)?;
    Ok(Json(metrics))
}

/// GET /api/v1/health — Simple health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
