use crate::api::error::AppError;
use crate::utils::range::{ByteRange, RangeError, parse_range};
use crate::utils::safe_path::safe_join;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::SeekFrom;
use std::path::{Path as FsPath, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A request under `/files/{subject_id}/`: either a bare filename or
/// `users/{user_id}/{filename}`.
#[derive(Debug, PartialEq, Eq)]
struct FileRequest {
    user_id: Option<i32>,
    filename: String,
}

impl FileRequest {
    /// Keeps only the basename of the requested file.
    fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (user_id, raw_name) = match segments.as_slice() {
            ["users", uid, name] => (Some(uid.parse().ok()?), *name),
            [.., name] => (None, *name),
            [] => return None,
        };

        let filename = FsPath::new(raw_name)
            .file_name()?
            .to_str()?
            .to_string();

        Some(Self { user_id, filename })
    }
}

/// The requested user's folder first (if any), then the material folder,
/// then every submission folder of the subject.
async fn find_candidate(
    upload_root: &FsPath,
    subject_id: i32,
    request: &FileRequest,
) -> Result<Option<PathBuf>, AppError> {
    let subject_dir = safe_join(upload_root, [subject_id.to_string()])?;
    let mut candidates = Vec::new();

    if let Some(uid) = request.user_id {
        candidates.push(safe_join(
            &subject_dir,
            ["users".to_string(), uid.to_string(), request.filename.clone()],
        )?);
    }
    candidates.push(safe_join(&subject_dir, [&request.filename])?);

    for candidate in &candidates {
        if is_file(candidate).await {
            return Ok(Some(candidate.clone()));
        }
    }

    let users_dir = subject_dir.join("users");
    let Ok(mut entries) = tokio::fs::read_dir(&users_dir).await else {
        return Ok(None);
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
    {
        let candidate = safe_join(&entry.path(), [&request.filename])?;
        if is_file(&candidate).await {
            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

async fn is_file(path: &FsPath) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn content_type_for(filename: &str) -> mime::Mime {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => mime::APPLICATION_PDF,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "png" => mime::IMAGE_PNG,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect();
    let fallback = if fallback.is_empty() {
        "file".to_string()
    } else {
        fallback
    };

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, NON_ALPHANUMERIC)
    )
}

/// Serve a material or submission file
#[utoipa::path(
    get,
    path = "/files/{subject_id}/{path}",
    params(
        ("subject_id" = i32, Path, description = "Subject ID"),
        ("path" = String, Path, description = "`{filename}` or `users/{user_id}/{filename}`")
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 206, description = "Partial file content"),
        (status = 400, description = "Malformed Range header"),
        (status = 404, description = "File not found"),
        (status = 416, description = "Range not satisfiable")
    ),
    tag = "files"
)]
pub async fn serve_file(
    State(state): State<crate::AppState>,
    Path((subject_id, path)): Path<(i32, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request = FileRequest::parse(&path)
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let full_path = find_candidate(state.storage.upload_root(), subject_id, &request)
        .await?
        .ok_or_else(|| {
            tracing::debug!("No candidate for /files/{}/{}", subject_id, path);
            AppError::NotFound("File not found".to_string())
        })?;

    let mut file = tokio::fs::File::open(&full_path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open file: {}", e)))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .len();

    let range: Option<ByteRange> = match headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid Range header".to_string()))?;
            match parse_range(value, size) {
                Ok(r) => Some(r),
                Err(RangeError::Malformed) => {
                    return Err(AppError::BadRequest("Invalid Range header".to_string()));
                }
                Err(RangeError::NotSatisfiable) => {
                    return Err(AppError::RangeNotSatisfiable(size));
                }
            }
        }
        None => None,
    };

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(&request.filename).as_ref())
        .header(header::CONTENT_DISPOSITION, content_disposition(&request.filename))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::X_FRAME_OPTIONS, "SAMEORIGIN");

    let response = match range {
        Some(r) => {
            file.seek(SeekFrom::Start(r.start))
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let reader = file.take(r.content_length());

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, r.content_range(size))
                .header(header::CONTENT_LENGTH, r.content_length())
                .body(Body::from_stream(ReaderStream::with_capacity(
                    reader,
                    STREAM_CHUNK_SIZE,
                )))
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::with_capacity(
                file,
                STREAM_CHUNK_SIZE,
            ))),
    };

    response.map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_request() {
        assert_eq!(
            FileRequest::parse("report.pdf"),
            Some(FileRequest {
                user_id: None,
                filename: "report.pdf".to_string()
            })
        );
        assert_eq!(
            FileRequest::parse("users/7/answer.docx"),
            Some(FileRequest {
                user_id: Some(7),
                filename: "answer.docx".to_string()
            })
        );
        assert_eq!(FileRequest::parse("users/abc/answer.docx"), None);
        assert_eq!(FileRequest::parse(""), None);
    }

    #[test]
    fn test_parse_keeps_basename_only() {
        let req = FileRequest::parse("../../etc/passwd").unwrap();
        assert_eq!(req.filename, "passwd");
        assert_eq!(FileRequest::parse(".."), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.PDF"), mime::APPLICATION_PDF);
        assert_eq!(content_type_for("a.jpeg"), mime::IMAGE_JPEG);
        assert_eq!(content_type_for("a.png"), mime::IMAGE_PNG);
        assert_eq!(content_type_for("a.docx"), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report%2Epdf"
        );
    }
}
