//! API errors with structured JSON bodies: `{ "error": { "code", "message" } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use twin_core::{EmbedError, EngineError};
use twin_pipeline::MatchError;
use twin_store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No celebrity matches found!")]
    NoMatch,
    #[error("no face detected")]
    NoFace,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("upload too large")]
    PayloadTooLarge,
    #[error("vector database unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NoMatch => (
                StatusCode::NOT_FOUND,
                "NO_MATCH",
                "No celebrity matches found!".to_string(),
            ),
            ApiError::NoFace => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_FACE",
                "No face found in the photo. Try a clearer, front-facing shot.".to_string(),
            ),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("Photos are limited to {} MB", crate::routes::MAX_UPLOAD_BYTES / (1024 * 1024)),
            ),
            ApiError::Unavailable(detail) => {
                tracing::warn!(detail, "vector database unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "The celebrity catalog is unavailable right now".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: ErrorDetail { code, message } })).into_response()
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Engine(EngineError::Embed(EmbedError::NoFaceDetected)) => ApiError::NoFace,
            MatchError::Engine(EngineError::Embed(EmbedError::InvalidImage(detail))) => {
                ApiError::BadRequest(format!("could not read image: {detail}"))
            }
            MatchError::Engine(e) => ApiError::Internal(e.to_string()),
            MatchError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::CollectionNotFound(_) => {
                ApiError::Unavailable(err.to_string())
            }
            // Outages and throttling only; other 4xx replies mean the request was wrong.
            StoreError::Status { status, .. } if status == 429 || status >= 500 => {
                ApiError::Unavailable(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
