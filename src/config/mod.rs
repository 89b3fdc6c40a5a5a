use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf", "odt"];
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

/// Storage and service configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root for subject materials and per-user submissions (default: "static/uploads")
    pub upload_folder: PathBuf,

    /// Root for chat attachments (default: "static/chat_files")
    pub chat_files_folder: PathBuf,

    /// Root for ticket attachments (default: "static/ticket_files")
    pub ticket_files_folder: PathBuf,

    /// Global request body ceiling in bytes (default: 20 MB)
    pub max_content_length: usize,

    /// Base URL used when minting share links (default: "http://localhost:3000")
    pub public_base_url: String,

    /// Run the optimizer after a successful upload (default: true)
    pub optimize_uploads: bool,

    /// Optimizer type: "local" or "noop" (default: "local")
    pub optimizer_type: String,

    /// Ghostscript executable used for PDF recompression (default: "gs")
    pub ghostscript_bin: String,

    /// Upper bound for a single external optimizer run (default: 60s)
    pub optimizer_timeout_secs: u64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_folder: PathBuf::from("static/uploads"),
            chat_files_folder: PathBuf::from("static/chat_files"),
            ticket_files_folder: PathBuf::from("static/ticket_files"),
            max_content_length: 20 * 1024 * 1024, // 20 MB
            public_base_url: "http://localhost:3000".to_string(),
            optimize_uploads: true,
            optimizer_type: "local".to_string(),
            ghostscript_bin: "gs".to_string(),
            optimizer_timeout_secs: 60,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_folder: env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.upload_folder),

            chat_files_folder: env::var("CHAT_FILES_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.chat_files_folder),

            ticket_files_folder: env::var("TICKET_FILES_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.ticket_files_folder),

            max_content_length: env::var("MAX_CONTENT_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_content_length),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.public_base_url),

            optimize_uploads: env::var("OPTIMIZE_UPLOADS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.optimize_uploads),

            optimizer_type: env::var("OPTIMIZER_TYPE").unwrap_or(default.optimizer_type),

            ghostscript_bin: env::var("GHOSTSCRIPT_BIN").unwrap_or(default.ghostscript_bin),

            optimizer_timeout_secs: env::var("OPTIMIZER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.optimizer_timeout_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Config rooted in a scratch directory, optimizer disabled
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            upload_folder: root.join("uploads"),
            chat_files_folder: root.join("chat_files"),
            ticket_files_folder: root.join("ticket_files"),
            optimize_uploads: false,
            optimizer_type: "noop".to_string(),
            ..Self::default()
        }
    }
}

/// Identity used for the size tier lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey {
    pub id: i32,
    pub username: String,
}

impl UserKey {
    pub fn new(id: i32, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Per-class upload limits and the identity allow-list for the elevated tier
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Default per-file limit (default: 200 MB)
    pub default_max_file_size: u64,

    /// Limit for users on the allow-list (default: 1 GB)
    pub special_max_file_size: u64,

    pub special_user_ids: HashSet<i32>,
    pub special_usernames: HashSet<String>,

    /// Extensions accepted for ticket and chat attachments
    pub allowed_extensions: HashSet<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            default_max_file_size: 200 * 1024 * 1024,
            special_max_file_size: 1024 * 1024 * 1024,
            special_user_ids: HashSet::new(),
            special_usernames: HashSet::new(),
            allowed_extensions: IMAGE_EXTENSIONS
                .iter()
                .chain(DOCUMENT_EXTENSIONS)
                .chain(ARCHIVE_EXTENSIONS)
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl UploadPolicy {
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            default_max_file_size: env::var("DEFAULT_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.default_max_file_size),

            special_max_file_size: env::var("SPECIAL_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.special_max_file_size),

            special_user_ids: env::var("SPECIAL_USER_IDS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .filter_map(|s| s.trim().parse().ok())
                        .collect()
                })
                .unwrap_or(default.special_user_ids),

            special_usernames: env::var("SPECIAL_USERNAMES")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.special_usernames),

            allowed_extensions: default.allowed_extensions,
        }
    }

    pub fn with_special_users<I, S>(mut self, ids: &[i32], usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_user_ids.extend(ids.iter().copied());
        self.special_usernames
            .extend(usernames.into_iter().map(Into::into));
        self
    }

    pub fn is_special_user(&self, user: &UserKey) -> bool {
        self.special_user_ids.contains(&user.id) || self.special_usernames.contains(&user.username)
    }

    pub fn max_file_size_for(&self, user: Option<&UserKey>) -> u64 {
        match user {
            Some(u) if self.is_special_user(u) => self.special_max_file_size,
            _ => self.default_max_file_size,
        }
    }
}
