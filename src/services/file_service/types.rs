use crate::services::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File too large: {size} bytes exceeds the limit of {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("File type not allowed: {0}")]
    UnsupportedExtension(String),

    #[error("No file selected")]
    EmptyFilename,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Material {0} does not accept submissions")]
    NotAnAssignment(i32),

    #[error("Failed to save file {0}")]
    SaveFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}
