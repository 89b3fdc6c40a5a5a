use crate::services::optimizer::FileOptimizer;
use crate::services::storage::FileStorageManager;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod delete;
pub mod types;
pub mod upload;

pub use types::UploadError;

/// Upload and delete workflows that keep stored files and their database
/// records in step.
pub struct FileService {
    db: DatabaseConnection,
    storage: Arc<FileStorageManager>,
    optimizer: Arc<dyn FileOptimizer>,
}

impl FileService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<FileStorageManager>,
        optimizer: Arc<dyn FileOptimizer>,
    ) -> Self {
        Self {
            db,
            storage,
            optimizer,
        }
    }

    pub fn storage(&self) -> &FileStorageManager {
        &self.storage
    }
}
