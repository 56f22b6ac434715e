//! Error types
//!
//! `PipelineError` covers configuration, manifests and local state.
//! `ApiError` maps agent failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised outside of stage execution
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("manifest error in {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("manifest directory {0} contains no manifests")]
    NoManifests(PathBuf),

    #[error("build counter at {path}: {message}")]
    BuildCounter { path: PathBuf, message: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Agent API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401 - missing or wrong API key
    #[error("Unauthorized")]
    Unauthorized,
    /// 400
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 404
    #[error("Not found: {0}")]
    NotFound(String),
    /// 409 - a run is already in progress
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 500
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::unauthorized().into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::not_found("Run 'x'").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::conflict("busy").into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::bad_request("build number 0").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::manifest("k8s/app.yml", "missing kind");
        assert_eq!(err.to_string(), "manifest error in k8s/app.yml: missing kind");
        let err: ApiError = PipelineError::config("bad port").into();
        assert!(matches!(err, ApiError::Internal(m) if m.contains("bad port")));
    }
}
