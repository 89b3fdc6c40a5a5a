use crate::config::StorageConfig;
use crate::services::storage;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Extensions the local optimizer knows how to shrink
pub const OPTIMIZABLE_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "ipynb", "jpg", "jpeg", "png"];

/// Archive members dropped when re-packing Office documents
const OFFICE_JUNK_ENTRIES: &[&str] = &[
    "docProps/thumbnail.jpeg",
    "docProps/thumbnail.png",
    "docProps/thumbnail.wmf",
    "docProps/thumbnail.emf",
    "[Content_Types].xml.bak",
];

/// Outcome of an optimization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optimization {
    pub success: bool,
    /// Set when the optimizer renamed the file
    pub new_name: Option<String>,
}

impl Optimization {
    pub fn unchanged() -> Self {
        Self {
            success: true,
            new_name: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            new_name: None,
        }
    }
}

/// Post-processing step that shrinks a stored file in place.
///
/// Implementations must leave the original untouched on any failure.
#[async_trait::async_trait]
pub trait FileOptimizer: Send + Sync {
    fn should_optimize(&self, filename: &str) -> bool;

    async fn optimize(&self, path: &Path) -> Optimization;
}

fn extension_of(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

/// Optimizer backed by Ghostscript, zip re-packing and notebook cleanup
pub struct LocalOptimizer {
    ghostscript_bin: String,
    timeout: Duration,
}

impl LocalOptimizer {
    pub fn new(ghostscript_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ghostscript_bin: ghostscript_bin.into(),
            timeout,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.ghostscript_bin.clone(),
            Duration::from_secs(config.optimizer_timeout_secs),
        )
    }

    fn temp_beside(path: &Path) -> Result<NamedTempFile> {
        storage::temp_beside(path, ".optimized").context("Failed to create temporary file")
    }

    /// Moves `candidate` over `original` only if it is non-empty and
    /// strictly smaller. The temporary file is removed otherwise.
    async fn replace_if_smaller(original: &Path, candidate: NamedTempFile) -> Result<Optimization> {
        let original_size = tokio::fs::metadata(original).await?.len();
        let optimized_size = tokio::fs::metadata(candidate.path()).await?.len();

        if optimized_size == 0 || optimized_size >= original_size {
            tracing::debug!(
                "Keeping original {} (optimized {} bytes, original {} bytes)",
                original.display(),
                optimized_size,
                original_size
            );
            return Ok(Optimization::unchanged());
        }

        candidate
            .persist(original)
            .map_err(|e| anyhow!("Failed to replace {}: {}", original.display(), e.error))?;

        tracing::info!(
            "Optimized {} ({} -> {} bytes)",
            original.display(),
            original_size,
            optimized_size
        );
        Ok(Optimization::unchanged())
    }

    async fn optimize_pdf(&self, path: &Path) -> Result<Optimization> {
        let temp = Self::temp_beside(path)?;

        let mut cmd = Command::new(&self.ghostscript_bin);
        cmd.args([
            "-sDEVICE=pdfwrite",
            "-dCompatibilityLevel=1.4",
            "-dPDFSETTINGS=/ebook",
            "-dNOPAUSE",
            "-dQUIET",
            "-dBATCH",
        ])
        .arg(format!("-sOutputFile={}", temp.path().display()))
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("Ghostscript timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("Failed to run {}", self.ghostscript_bin))?;

        if !output.status.success() {
            bail!(
                "Ghostscript exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Self::replace_if_smaller(path, temp).await
    }

    async fn optimize_office(&self, path: &Path) -> Result<Optimization> {
        let source: PathBuf = path.to_path_buf();
        let temp = Self::temp_beside(path)?;

        let temp = tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            let mut temp = temp;
            repack_office(&source, temp.as_file_mut())?;
            Ok(temp)
        })
        .await??;

        Self::replace_if_smaller(path, temp).await
    }

    /// Clears outputs, execution counts and metadata. The notebook is
    /// rewritten unconditionally.
    async fn optimize_notebook(&self, path: &Path) -> Result<Optimization> {
        let raw = tokio::fs::read_to_string(path).await?;
        let mut notebook: Value = serde_json::from_str(&raw)?;
        strip_notebook(&mut notebook);

        let mut buf = Vec::with_capacity(raw.len());
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(&notebook, &mut ser)?;

        let mut temp = Self::temp_beside(path)?;
        temp.write_all(&buf)?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| anyhow!("Failed to replace {}: {}", path.display(), e.error))?;

        tracing::info!("Notebook cleaned: {}", path.display());
        Ok(Optimization::unchanged())
    }
}

fn repack_office(source: &Path, target: &mut std::fs::File) -> Result<()> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(source)?)?;
    let mut writer = zip::ZipWriter::new(target);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if OFFICE_JUNK_ENTRIES.contains(&name.as_str()) {
            continue;
        }
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }

        writer.start_file(name, options)?;
        std::io::copy(&mut entry, &mut writer)?;
    }

    writer.finish()?;
    Ok(())
}

fn strip_notebook(notebook: &mut Value) {
    if let Some(meta) = notebook.get_mut("metadata") {
        *meta = Value::Object(Default::default());
    }

    let Some(cells) = notebook.get_mut("cells").and_then(Value::as_array_mut) else {
        return;
    };

    for cell in cells.iter_mut().filter_map(Value::as_object_mut) {
        if cell.contains_key("metadata") {
            cell.insert("metadata".into(), Value::Object(Default::default()));
        }
        if cell.contains_key("outputs") {
            cell.insert("outputs".into(), Value::Array(Vec::new()));
        }
        if cell.contains_key("execution_count") {
            cell.insert("execution_count".into(), Value::Null);
        }
    }
}

#[async_trait::async_trait]
impl FileOptimizer for LocalOptimizer {
    fn should_optimize(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| OPTIMIZABLE_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn optimize(&self, path: &Path) -> Optimization {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::warn!("Cannot optimize missing file {}", path.display());
            return Optimization::failed();
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(ext) = extension_of(&filename) else {
            return Optimization::unchanged();
        };

        let result = match ext.as_str() {
            "pdf" => self.optimize_pdf(path).await,
            "docx" | "pptx" => self.optimize_office(path).await,
            "ipynb" => self.optimize_notebook(path).await,
            // Images are accepted as-is for now
            "jpg" | "jpeg" | "png" => Ok(Optimization::unchanged()),
            _ => Ok(Optimization::unchanged()),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!("Optimization failed for {}: {:#}", path.display(), e);
            Optimization::failed()
        })
    }
}

/// Optimizer used when post-processing is disabled
pub struct NoOpOptimizer;

#[async_trait::async_trait]
impl FileOptimizer for NoOpOptimizer {
    fn should_optimize(&self, _filename: &str) -> bool {
        false
    }

    async fn optimize(&self, _path: &Path) -> Optimization {
        Optimization::unchanged()
    }
}

/// Factory function to create the optimizer selected by config
pub fn create_optimizer(config: &StorageConfig) -> Box<dyn FileOptimizer> {
    if !config.optimize_uploads {
        return Box::new(NoOpOptimizer);
    }

    match config.optimizer_type.to_lowercase().as_str() {
        "local" => Box::new(LocalOptimizer::from_config(config)),
        "noop" | "none" | "disabled" => Box::new(NoOpOptimizer),
        other => {
            tracing::warn!("Unknown optimizer type '{}', using NoOpOptimizer", other);
            Box::new(NoOpOptimizer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    fn failing_optimizer() -> LocalOptimizer {
        LocalOptimizer::new("false", Duration::from_secs(5))
    }

    fn build_docx(path: &Path, with_thumbnail: bool) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file("[Content_Types].xml", stored).unwrap();
        zip.write_all(&b"<Types/>".repeat(200)).unwrap();
        zip.start_file("word/document.xml", stored).unwrap();
        zip.write_all(&b"<w:p>hello</w:p>".repeat(500)).unwrap();
        if with_thumbnail {
            zip.start_file("docProps/thumbnail.jpeg", stored).unwrap();
            zip.write_all(&[0xAB; 4096]).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_pdf_failure_leaves_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        let content = b"%PDF-1.4 not really a pdf".to_vec();
        std::fs::write(&path, &content).unwrap();

        let result = failing_optimizer().optimize(&path).await;

        assert_eq!(result, Optimization::failed());
        assert_eq!(std::fs::read(&path).unwrap(), content);
        // No temporary copy left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = failing_optimizer().optimize(&dir.path().join("nope.pdf")).await;
        assert_eq!(result, Optimization::failed());
    }

    #[tokio::test]
    async fn test_images_and_unknown_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["photo.png", "notes.txt", "README"] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"data").unwrap();
            assert_eq!(failing_optimizer().optimize(&path).await, Optimization::unchanged());
            assert_eq!(std::fs::read(&path).unwrap(), b"data");
        }
    }

    #[tokio::test]
    async fn test_office_repack_drops_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("essay.docx");
        build_docx(&path, true);
        let before = std::fs::metadata(&path).unwrap().len();

        let result = failing_optimizer().optimize(&path).await;
        assert_eq!(result, Optimization::unchanged());

        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert!(archive.by_name("docProps/thumbnail.jpeg").is_err());
        let mut doc = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut doc)
            .unwrap();
        assert!(doc.starts_with("<w:p>hello</w:p>"));
    }

    #[tokio::test]
    async fn test_corrupt_office_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pptx");
        std::fs::write(&path, b"not a zip archive").unwrap();

        assert_eq!(failing_optimizer().optimize(&path).await, Optimization::failed());
        assert_eq!(std::fs::read(&path).unwrap(), b"not a zip archive");
    }

    #[tokio::test]
    async fn test_notebook_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.ipynb");
        let notebook = json!({
            "metadata": {"kernelspec": {"name": "python3"}},
            "nbformat": 4,
            "cells": [
                {
                    "cell_type": "code",
                    "metadata": {"collapsed": false},
                    "execution_count": 7,
                    "outputs": [{"output_type": "stream", "text": "42"}],
                    "source": ["print(42)"]
                },
                {
                    "cell_type": "markdown",
                    "metadata": {},
                    "source": ["# Title"]
                }
            ]
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&notebook).unwrap()).unwrap();

        assert_eq!(failing_optimizer().optimize(&path).await, Optimization::unchanged());

        let cleaned: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(cleaned["metadata"], json!({}));
        assert_eq!(cleaned["cells"][0]["outputs"], json!([]));
        assert_eq!(cleaned["cells"][0]["execution_count"], Value::Null);
        assert_eq!(cleaned["cells"][0]["source"], json!(["print(42)"]));
        assert!(cleaned["cells"][1].get("outputs").is_none());
    }

    #[test]
    fn test_should_optimize() {
        let optimizer = failing_optimizer();
        assert!(optimizer.should_optimize("a.PDF"));
        assert!(optimizer.should_optimize("slides.pptx"));
        assert!(!optimizer.should_optimize("archive.zip"));
        assert!(!optimizer.should_optimize("noext"));
        assert!(!NoOpOptimizer.should_optimize("a.pdf"));
    }

    #[tokio::test]
    async fn test_create_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::development(dir.path());
        assert!(!create_optimizer(&config).should_optimize("a.pdf"));

        let config = StorageConfig {
            optimize_uploads: true,
            optimizer_type: "local".to_string(),
            ..config
        };
        assert!(create_optimizer(&config).should_optimize("a.pdf"));
    }
}
