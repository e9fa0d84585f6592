use annotate::{AnnotateError, ErrorKind};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error body returned by every endpoint: `{ "error": ..., "kind": ... }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: ErrorKind::Configuration.as_str(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::Configuration.as_str(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: ErrorKind::InferenceRuntime.as_str(),
            message: message.into(),
        }
    }
}

impl From<AnnotateError> for ApiError {
    fn from(err: AnnotateError) -> Self {
        let kind = err.kind();
        let status = match (&err, kind) {
            (AnnotateError::ModelNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Configuration) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::ModelFormat) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::InferenceRuntime) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: kind.as_str(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::internal(format!("worker task failed: {err}"))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, kind = self.kind, error = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, kind = self.kind, error = %self.message, "Request rejected");
        }
        let body = Json(json!({ "error": self.message, "kind": self.kind }));
        (self.status, body).into_response()
    }
}
