//! Storage abstraction trait
//!
//! Every backend implements `Storage`, so the chunk store, the processing
//! pipeline and the media endpoint never depend on where bytes actually live.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;
use vagon_core::AppError;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of object bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object {} not found", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `storage_key`, replacing any previous object.
    /// Returns the public URL of the object.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Download a whole object
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Delete every object under a key prefix
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Size in bytes of an object
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Write an object from a reader without buffering it in memory.
    /// Returns the number of bytes written.
    async fn upload_stream(
        &self,
        storage_key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64>;

    /// Read an object as a stream of chunks
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Filesystem path of an object, when the backend keeps objects on a
    /// local disk. External tools such as ffmpeg read from it directly.
    fn local_path(&self, storage_key: &str) -> StorageResult<Option<PathBuf>>;

    /// Public URL for an object key
    fn url_for(&self, storage_key: &str) -> String;
}
