use crate::config::{StorageConfig, UploadPolicy};
use crate::services::storage::FileStorageManager;
use std::sync::Arc;
use tracing::info;

/// Creates the three storage roots and the manager over them.
pub async fn setup_storage(
    config: &StorageConfig,
    policy: UploadPolicy,
) -> anyhow::Result<Arc<FileStorageManager>> {
    for (label, dir) in [
        ("Uploads", &config.upload_folder),
        ("Chat files", &config.chat_files_folder),
        ("Ticket files", &config.ticket_files_folder),
    ] {
        tokio::fs::create_dir_all(dir).await?;
        info!("📁 {}: {}", label, dir.display());
    }

    info!(
        "📏 Upload limits: {} bytes default, {} bytes elevated ({} users)",
        policy.default_max_file_size,
        policy.special_max_file_size,
        policy.special_user_ids.len() + policy.special_usernames.len()
    );

    Ok(Arc::new(FileStorageManager::new(config, policy)))
}
