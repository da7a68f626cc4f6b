use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors raised by file storage backends
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("S3 request for {key} failed: {message}")]
    S3 { key: String, message: String },

    #[error("File store call timed out after {0:?}")]
    Timeout(Duration),
}

/// An image received from a client, not yet persisted
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// File name as sent by the client
    pub file_name: String,
    /// Declared MIME type, if any
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Durable storage for uploaded originals and generated thumbnails
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist an upload under a fresh unique path and return that path
    async fn store(&self, upload: &UploadedImage) -> Result<String, FileStoreError>;

    /// Check whether a file exists at `path`
    async fn exists(&self, path: &str) -> Result<bool, FileStoreError>;

    /// Read the full content of the file at `path`
    async fn read(&self, path: &str) -> Result<Bytes, FileStoreError>;
}

/// File store backed by a local (or mounted) directory
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Create the store, making sure the upload directory exists
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| io_error(&root, source))?;

        info!(root = %root.display(), "Local file store initialized");

        Ok(Self { root })
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size_bytes = upload.data.len()))]
    async fn store(&self, upload: &UploadedImage) -> Result<String, FileStoreError> {
        let file_name = generate_file_name(&upload.file_name, Utc::now());
        let destination = self.root.join(&file_name);
        let partial = self.root.join(format!(".{file_name}.part"));

        debug!(destination = %destination.display(), "Moving upload into file storage");

        tokio::fs::write(&partial, &upload.data)
            .await
            .map_err(|source| io_error(&partial, source))?;

        // Readers only ever see complete files
        if let Err(source) = tokio::fs::rename(&partial, &destination).await {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                warn!(error = %e, path = %partial.display(), "Failed to remove partial upload");
            }
            return Err(io_error(&destination, source));
        }

        Ok(destination.to_string_lossy().into_owned())
    }

    async fn exists(&self, path: &str) -> Result<bool, FileStoreError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|source| io_error(path, source))
    }

    async fn read(&self, path: &str) -> Result<Bytes, FileStoreError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| io_error(path, source))?;
        Ok(Bytes::from(data))
    }
}

fn io_error(path: impl AsRef<std::path::Path>, source: io::Error) -> FileStoreError {
    FileStoreError::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

/// Unique stored name: `{unix_millis}_{uuid}_{sanitized original name}`
pub(crate) fn generate_file_name(original: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        now.timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitize_file_name(original)
    )
}

/// Sanitize a client-supplied file name to prevent path traversal
pub(crate) fn sanitize_file_name(name: &str) -> String {
    // Browsers on Windows may send the full client path
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Get content type for a stored file from its extension
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
