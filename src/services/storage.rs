use crate::config::{
    ARCHIVE_EXTENSIONS, DOCUMENT_EXTENSIONS, IMAGE_EXTENSIONS, StorageConfig, UploadPolicy,
    UserKey,
};
use crate::utils::safe_path::{is_within, normalize, safe_child, safe_join};
use crate::utils::sanitize::sanitize;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, AsyncWriteExt};
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path traversal detected: {path} is outside {base}")]
    PathTraversal { base: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Material,
    Submission,
    TicketAttachment,
    ChatAttachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Document,
    Archive,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Archive => "archive",
            FileType::Unknown => "unknown",
        }
    }
}

/// Where an upload lands on disk and what gets recorded in the database.
/// `full_path` is always inside the storage root for `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFileLocation {
    pub full_path: PathBuf,
    pub relative_path: String,
    pub kind: FileKind,
}

/// An incoming file: the client-supplied name, the size the client reported
/// (if any) and the body.
pub struct Upload<R> {
    pub filename: String,
    pub content_length: Option<u64>,
    pub body: R,
}

impl Upload<Cursor<Vec<u8>>> {
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_length: Some(data.len() as u64),
            body: Cursor::new(data),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SavedFileInfo {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: FileType,
}

/// Creates a hidden temporary file in the same directory as `path`, so a
/// later `persist` onto `path` is a rename within one filesystem.
pub(crate) fn temp_beside(path: &Path, suffix: &str) -> std::io::Result<NamedTempFile> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    tempfile::Builder::new()
        .prefix(&format!(".{}", name))
        .suffix(suffix)
        .tempfile_in(dir)
}

/// Local-disk storage for materials, submissions, ticket and chat attachments.
///
/// Layout under the three roots:
/// ```text
/// {upload_root}/{subject_id}/{name}                     materials
/// {upload_root}/{subject_id}/users/{user_id}/{name}     submissions
/// {ticket_root}/{ticket_id}/{timestamp}_{name}          ticket attachments
/// {chat_root}/{user_id}/{timestamp}_{name}              chat attachments
/// ```
pub struct FileStorageManager {
    upload_root: PathBuf,
    chat_root: PathBuf,
    ticket_root: PathBuf,
    policy: UploadPolicy,
}

impl FileStorageManager {
    pub fn new(config: &StorageConfig, policy: UploadPolicy) -> Self {
        Self {
            upload_root: normalize(&config.upload_folder),
            chat_root: normalize(&config.chat_files_folder),
            ticket_root: normalize(&config.ticket_files_folder),
            policy,
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn root_for(&self, kind: FileKind) -> &Path {
        match kind {
            FileKind::Material | FileKind::Submission => &self.upload_root,
            FileKind::TicketAttachment => &self.ticket_root,
            FileKind::ChatAttachment => &self.chat_root,
        }
    }

    fn roots(&self) -> [&Path; 3] {
        [&self.upload_root, &self.chat_root, &self.ticket_root]
    }

    fn timestamped(filename: &str) -> String {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        format!("{}_{}", timestamp, sanitize(filename))
    }

    pub async fn material_upload_path(
        &self,
        subject_id: i32,
        filename: &str,
    ) -> Result<StoredFileLocation, StorageError> {
        let safe_name = sanitize(filename);
        let subject_dir = safe_join(&self.upload_root, [subject_id.to_string()])?;
        fs::create_dir_all(&subject_dir).await?;

        Ok(StoredFileLocation {
            full_path: safe_join(&subject_dir, [&safe_name])?,
            relative_path: format!("{}/{}", subject_id, safe_name),
            kind: FileKind::Material,
        })
    }

    pub async fn submission_upload_path(
        &self,
        subject_id: i32,
        user_id: i32,
        filename: &str,
    ) -> Result<StoredFileLocation, StorageError> {
        let safe_name = sanitize(filename);
        let user_dir = safe_join(
            &self.upload_root,
            [subject_id.to_string(), "users".to_string(), user_id.to_string()],
        )?;
        fs::create_dir_all(&user_dir).await?;

        Ok(StoredFileLocation {
            full_path: safe_join(&user_dir, [&safe_name])?,
            relative_path: format!("{}/users/{}/{}", subject_id, user_id, safe_name),
            kind: FileKind::Submission,
        })
    }

    pub async fn chat_file_path(
        &self,
        user_id: i32,
        filename: &str,
    ) -> Result<StoredFileLocation, StorageError> {
        let unique_name = Self::timestamped(filename);
        let user_dir = safe_join(&self.chat_root, [user_id.to_string()])?;
        fs::create_dir_all(&user_dir).await?;

        Ok(StoredFileLocation {
            full_path: safe_join(&user_dir, [&unique_name])?,
            relative_path: format!("{}/{}", user_id, unique_name),
            kind: FileKind::ChatAttachment,
        })
    }

    /// Both the ticket directory and the leaf file go through the traversal
    /// check, since the ticket id arrives from the request. The directory
    /// must sit directly under the ticket root.
    pub async fn ticket_file_path(
        &self,
        ticket_id: impl Display,
        filename: &str,
    ) -> Result<StoredFileLocation, StorageError> {
        let ticket_dir = self.ticket_dir(&ticket_id.to_string()).inspect_err(|e| {
            tracing::error!("Path traversal attempt detected (ticket dir): {}", e);
        })?;
        fs::create_dir_all(&ticket_dir).await?;

        let unique_name = Self::timestamped(filename);
        let full_path = safe_join(&ticket_dir, [&unique_name]).inspect_err(|e| {
            tracing::error!("Path traversal attempt detected (ticket file): {}", e);
        })?;

        let dir_name = ticket_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(StoredFileLocation {
            full_path,
            relative_path: format!("{}/{}", dir_name, unique_name),
            kind: FileKind::TicketAttachment,
        })
    }

    fn ticket_dir(&self, ticket_id: &str) -> Result<PathBuf, StorageError> {
        safe_child(&self.ticket_root, ticket_id)
    }

    /// Writes `reader` to `full_path`.
    ///
    /// Returns `true` only when the file exists afterwards. Every failure is
    /// logged and reported as `false`; a size mismatch against
    /// `reported_size` is only a warning.
    pub async fn save_file<R>(&self, reader: R, reported_size: Option<u64>, full_path: &Path) -> bool
    where
        R: AsyncRead + Unpin,
    {
        let target = normalize(full_path);
        if !self.roots().iter().any(|root| is_within(&target, root)) {
            tracing::error!(
                "Path traversal attempt detected: {} is outside every storage root",
                target.display()
            );
            return false;
        }

        tracing::info!(
            path = %target.display(),
            reported_size = ?reported_size,
            "Saving uploaded file"
        );

        if let Err(e) = Self::write_stream(reader, &target).await {
            tracing::error!("Failed to save file {}: {}", target.display(), e);
            return false;
        }

        match fs::metadata(&target).await {
            Ok(meta) => {
                let saved_size = meta.len();
                if let Some(expected) = reported_size {
                    if expected != saved_size {
                        tracing::warn!(
                            "Size mismatch for {}: expected {} bytes, wrote {}",
                            target.display(),
                            expected,
                            saved_size
                        );
                    }
                }
                tracing::info!(
                    "File saved: {} ({})",
                    target.display(),
                    Self::format_file_size(saved_size)
                );
                true
            }
            Err(e) => {
                tracing::error!("File missing after save {}: {}", target.display(), e);
                false
            }
        }
    }

    /// Streams into a temporary file next to `target` and moves it into place
    /// only once the whole body has been written. A failed upload leaves any
    /// previous file at `target` untouched and no partial file behind.
    async fn write_stream<R>(mut reader: R, target: &Path) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let (file, temp_path) = temp_beside(target, ".part")?.into_parts();
        let mut file = fs::File::from_std(file);
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path.persist(target).map_err(|e| e.error)?;
        Ok(written)
    }

    /// Removes a material or submission file given its recorded relative path.
    pub async fn delete_file(&self, relative_path: &str) -> bool {
        self.delete_file_in(FileKind::Material, relative_path).await
    }

    pub async fn delete_file_in(&self, kind: FileKind, relative_path: &str) -> bool {
        let full_path = match safe_join(self.root_for(kind), [relative_path]) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Refusing to delete {}: {}", relative_path, e);
                return false;
            }
        };

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::info!("Deleted file {}", full_path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::error!("Failed to delete file {}: {}", relative_path, e);
                false
            }
        }
    }

    /// Removes the whole attachment directory of a ticket.
    pub async fn delete_ticket_files(&self, ticket_id: impl Display) -> bool {
        let ticket_dir = match self.ticket_dir(&ticket_id.to_string()) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Refusing to delete ticket files: {}", e);
                return false;
            }
        };

        if !fs::try_exists(&ticket_dir).await.unwrap_or(false) {
            return false;
        }

        match fs::remove_dir_all(&ticket_dir).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to delete files of ticket {}: {}", ticket_id, e);
                false
            }
        }
    }

    /// Removes a user's chat attachments and their submission folder in
    /// every subject.
    pub async fn delete_user_files(&self, user_id: i32) -> bool {
        match self.remove_user_tree(user_id).await {
            Ok(removed) => {
                tracing::info!("Removed {} directories of user {}", removed, user_id);
                true
            }
            Err(e) => {
                tracing::error!("Failed to delete files of user {}: {}", user_id, e);
                false
            }
        }
    }

    async fn remove_user_tree(&self, user_id: i32) -> Result<usize, StorageError> {
        let mut removed = 0;

        let chat_dir = safe_join(&self.chat_root, [user_id.to_string()])?;
        if fs::try_exists(&chat_dir).await? {
            fs::remove_dir_all(&chat_dir).await?;
            removed += 1;
        }

        if !fs::try_exists(&self.upload_root).await? {
            return Ok(removed);
        }

        let mut subjects = fs::read_dir(&self.upload_root).await?;
        while let Some(entry) = subjects.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let user_dir = entry.path().join("users").join(user_id.to_string());
            if fs::try_exists(&user_dir).await? {
                fs::remove_dir_all(&user_dir).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn extension(filename: &str) -> Option<String> {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
    }

    /// Case-insensitive extension check. `None` uses the policy's attachment set.
    pub fn is_allowed_file(&self, filename: &str, allowed: Option<&HashSet<String>>) -> bool {
        let allowed = allowed.unwrap_or(&self.policy.allowed_extensions);
        Self::extension(filename).is_some_and(|ext| allowed.contains(&ext))
    }

    pub fn file_type(filename: &str) -> FileType {
        let Some(ext) = Self::extension(filename) else {
            return FileType::Unknown;
        };
        let ext = ext.as_str();

        if IMAGE_EXTENSIONS.contains(&ext) {
            FileType::Image
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            FileType::Document
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            FileType::Archive
        } else {
            FileType::Unknown
        }
    }

    /// Size of a seekable stream without consuming it. Unreadable streams
    /// report 0.
    pub async fn stream_size<S>(stream: &mut S) -> u64
    where
        S: AsyncSeek + Unpin,
    {
        async fn measure<S: AsyncSeek + Unpin>(s: &mut S) -> std::io::Result<u64> {
            let current = s.stream_position().await?;
            let end = s.seek(SeekFrom::End(0)).await?;
            s.seek(SeekFrom::Start(current)).await?;
            Ok(end)
        }

        measure(stream).await.unwrap_or_else(|e| {
            tracing::debug!("Could not measure stream: {}", e);
            0
        })
    }

    /// `max_size` overrides the per-user limit when given.
    pub async fn validate_file_size<S>(
        &self,
        stream: &mut S,
        max_size: Option<u64>,
        user: Option<&UserKey>,
    ) -> bool
    where
        S: AsyncSeek + Unpin,
    {
        let limit = max_size.unwrap_or_else(|| self.max_file_size_for(user));
        Self::stream_size(stream).await <= limit
    }

    pub fn max_file_size_for(&self, user: Option<&UserKey>) -> u64 {
        self.policy.max_file_size_for(user)
    }

    pub fn is_special_user(&self, user: &UserKey) -> bool {
        self.policy.is_special_user(user)
    }

    pub fn format_file_size(size_bytes: u64) -> String {
        if size_bytes == 0 {
            return "0 B".to_string();
        }

        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = size_bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }

        format!("{:.1} {}", size, UNITS[unit])
    }

    pub fn limit_message(&self, user: Option<&UserKey>) -> String {
        let limit = Self::format_file_size(self.max_file_size_for(user));
        match user {
            Some(u) if self.is_special_user(u) => {
                format!("Maximum file size: {} (elevated limit for {})", limit, u.username)
            }
            _ => format!("Maximum file size: {}", limit),
        }
    }

    /// Validates and stores a batch of ticket attachments. Invalid files are
    /// skipped with a warning; only a traversal attempt aborts the batch.
    pub async fn process_ticket_files<R>(
        &self,
        ticket_id: impl Display,
        uploads: Vec<Upload<R>>,
        user: Option<&UserKey>,
    ) -> Result<Vec<SavedFileInfo>, StorageError>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let ticket_id = ticket_id.to_string();
        let mut saved = Vec::new();

        for mut upload in uploads {
            if upload.filename.trim().is_empty() {
                continue;
            }

            let size = Self::stream_size(&mut upload.body).await;
            if size > self.max_file_size_for(user) {
                tracing::warn!("File {} is too large ({} bytes)", upload.filename, size);
                continue;
            }

            if !self.is_allowed_file(&upload.filename, None) {
                tracing::warn!("Unsupported file type: {}", upload.filename);
                continue;
            }

            let location = self.ticket_file_path(&ticket_id, &upload.filename).await?;
            let reported = upload.content_length.or(Some(size));

            if self.save_file(upload.body, reported, &location.full_path).await {
                tracing::info!("File {} saved for ticket {}", upload.filename, ticket_id);
                saved.push(SavedFileInfo {
                    file_path: location.relative_path,
                    file_type: Self::file_type(&upload.filename),
                    file_name: upload.filename,
                    file_size: size,
                });
            } else {
                tracing::error!("Failed to save file {}", upload.filename);
            }
        }

        Ok(saved)
    }
}
