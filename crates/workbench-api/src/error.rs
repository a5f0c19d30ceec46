//! JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use workbench_core::{BrokerError, StoreErrorKind, WorkbenchError};

/// Error returned by a handler, rendered as `{ok:false, error}`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Mapping for endpoints that need a live account: an unavailable
    /// broker answers 503.
    pub fn account(err: WorkbenchError) -> Self {
        match err {
            WorkbenchError::Broker(BrokerError::Unavailable(message)) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, format!("broker unavailable: {}", message))
            }
            other => other.into(),
        }
    }
}

impl From<WorkbenchError> for ApiError {
    fn from(err: WorkbenchError) -> Self {
        let status = match &err {
            WorkbenchError::InvalidArgument(_) | WorkbenchError::InvalidRange(_) => StatusCode::BAD_REQUEST,
            WorkbenchError::Store(e) if e.kind == StoreErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            WorkbenchError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkbenchError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        } else {
            warn!(status = self.status.as_u16(), error = %self.message, "Request rejected");
        }
        (self.status, Json(json!({"ok": false, "error": self.message}))).into_response()
    }
}
