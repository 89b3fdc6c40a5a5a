use crate::services::file_service::UploadError;
use crate::services::short_link_service::ShortLinkError;
use crate::services::storage::StorageError;
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    /// Carries the file size for the `Content-Range: bytes */size` header
    #[error("Range Not Satisfiable")]
    RangeNotSatisfiable(u64),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::PathTraversal { .. } => {
                tracing::error!("Path traversal attempt: {}", e);
                AppError::Forbidden("Invalid file path".to_string())
            }
            StorageError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ShortLinkError> for AppError {
    fn from(e: ShortLinkError) -> Self {
        match e {
            ShortLinkError::NotFound => AppError::NotFound("Link not found".to_string()),
            ShortLinkError::CodeCollision(code) => {
                AppError::Internal(format!("Short code collision on {}", code))
            }
            ShortLinkError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::SizeLimitExceeded { .. } => AppError::PayloadTooLarge(e.to_string()),
            UploadError::UnsupportedExtension(_)
            | UploadError::EmptyFilename
            | UploadError::NotAnAssignment(_) => AppError::BadRequest(e.to_string()),
            UploadError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            UploadError::SaveFailed(path) => {
                AppError::Internal(format!("Failed to save file {}", path))
            }
            UploadError::Storage(e) => e.into(),
            UploadError::Database(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::RangeNotSatisfiable(size) => {
                let body = Json(json!({
                    "error": "Requested range not satisfiable"
                }));
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                    body,
                )
                    .into_response();
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
