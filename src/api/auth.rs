// src/api/auth.rs

use crate::api::types::{error_response, ApiError};
use crate::api::ApiState;
use axum::http::{HeaderMap, StatusCode};

/// Verify the bearer token if one is configured.
pub fn check_auth(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(ref expected) = state.token else {
        return Ok(());
    };

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or missing bearer token",
            Some("unauthorized"),
        ))
    }
}

/// Constant-time byte comparison for token checks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
