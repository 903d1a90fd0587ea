use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{IdentifyError, MatchError, UploadError};

/// Error body returned as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn no_face() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "No face detected")
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<IdentifyError> for ApiError {
    fn from(err: IdentifyError) -> Self {
        match err {
            IdentifyError::Match(MatchError::EmptyGallery) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Gallery is empty")
            }
            other => Self::internal(other),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidName(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            other => Self::internal(other),
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
