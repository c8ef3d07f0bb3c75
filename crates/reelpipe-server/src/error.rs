//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use reelpipe_media::MediaError;
use reelpipe_pipeline::PipelineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Queue full")]
    QueueFull,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::QueueFull(_) => ApiError::QueueFull,
            PipelineError::JobNotFound(id) => ApiError::not_found(format!("job {id}")),
            PipelineError::Media(MediaError::InvalidSource(msg)) => ApiError::bad_request(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelpipe_models::JobId;

    #[test]
    fn test_status_mapping() {
        let full: ApiError = PipelineError::QueueFull(32).into();
        assert_eq!(full.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let missing: ApiError = PipelineError::JobNotFound(JobId::new()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let bad: ApiError =
            PipelineError::Media(MediaError::invalid_source("bad scheme")).into();
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    }
}
