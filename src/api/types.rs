// src/api/types.rs

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::run_config::{ConfigFormat, RunConfig};
use crate::core::types::{LabeledSample, RunHandle, RunPhase, RunStatus};
use crate::infra::errors::{ConfigError, ControllerError, ResultError};

/// Body of `POST /api/v1/runs` and `POST /api/v1/config/validate`: either a
/// config document in JSON or the raw text of a JSON/TOML/YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunConfigBody {
    Text { format: ConfigFormat, text: String },
    Document(serde_json::Value),
}

/// Response for run creation.
#[derive(Debug, Serialize)]
pub struct RunCreatedResponse {
    pub run_id: RunHandle,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub current_round: u32,
}

/// Body of `POST /api/v1/runs/{id}/labels`.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelSubmission {
    #[serde(alias = "iteration")]
    pub round: u32,
    pub labeled_samples: Vec<LabeledSample>,
}

/// Response for config validation.
#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: impl Into<String>, kind: Option<&str>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            kind: kind.map(str::to_string),
        }),
    )
}

pub fn config_error(e: ConfigError) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, e.to_string(), Some("invalid_config"))
}

/// Map a controller error onto an HTTP status.
pub fn controller_error(e: ControllerError) -> ApiError {
    let kind = serde_json::to_value(e.kind())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string));

    let status = match &e {
        ControllerError::InvalidConfig(_) | ControllerError::InvalidLabels(_) => {
            StatusCode::BAD_REQUEST
        }
        ControllerError::UnknownRun(_) | ControllerError::Storage(ResultError::NotFound { .. }) => {
            StatusCode::NOT_FOUND
        }
        ControllerError::NotReady { .. }
        | ControllerError::WrongRound { .. }
        | ControllerError::RunFinished { .. }
        | ControllerError::Storage(ResultError::AlreadyFinalized { .. }) => StatusCode::CONFLICT,
        ControllerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("API request failed: {}", e);
    }

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let (status, body) = controller_error(ControllerError::UnknownRun("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.kind.as_deref(), Some("unknown_run"));

        let (status, _) = controller_error(ControllerError::WrongRound {
            requested: 2,
            current: 1,
            phase: "AWAITING_LABELS".into(),
        });
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = controller_error(ControllerError::InvalidLabels("empty".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = controller_error(ControllerError::Storage(ResultError::NotFound {
            run_id: "x".into(),
            round: 4,
        }));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.kind.as_deref(), Some("storage"));

        let (status, _) = controller_error(ControllerError::Storage(ResultError::Unavailable));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_label_submission_accepts_iteration_alias() {
        let body: LabelSubmission = serde_json::from_str(
            r#"{"iteration": 1, "labeled_samples": [{"sample_id": "s1", "label": "cat"}]}"#,
        )
        .unwrap();
        assert_eq!(body.round, 1);
        assert_eq!(body.labeled_samples[0].sample_id, "s1");
    }

    #[test]
    fn test_config_body_variants() {
        let text: RunConfigBody =
            serde_json::from_str(r#"{"format": "yaml", "text": "dataset: d"}"#).unwrap();
        assert!(matches!(
            text,
            RunConfigBody::Text {
                format: ConfigFormat::Yaml,
                ..
            }
        ));

        let doc: RunConfigBody = serde_json::from_str(r#"{"dataset": "d"}"#).unwrap();
        assert!(matches!(doc, RunConfigBody::Document(_)));
    }
}
