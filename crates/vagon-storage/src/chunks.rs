//! Chunked upload store.
//!
//! Clients send a file as numbered fragments, possibly out of order and with
//! retries, then ask for assembly explicitly. Fragments of one upload are
//! serialized by a per-upload async mutex; different uploads never contend.
//!
//! Assembly streams the fragments into the final object without holding the
//! file in memory, and deletes the fragments only after the object is fully
//! written. A failed assembly leaves every fragment in place.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;
use vagon_core::AppError;

use crate::keys;
use crate::traits::{Storage, StorageError};

static FILE_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").ok());

/// Chunk transfer failures
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid file id '{0}': expected 1-128 characters of [A-Za-z0-9_-]")]
    InvalidFileId(String),

    #[error("totalChunks must be between 1 and {max}, got {got}")]
    InvalidTotalChunks { got: u32, max: u32 },

    #[error("chunkIndex {index} is out of range for totalChunks {total}")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("totalChunks {got} disagrees with {expected} declared earlier for this upload")]
    TotalChunksMismatch { expected: u32, got: u32 },

    #[error("Chunk of {size} bytes exceeds the {max} byte limit")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("Upload {file_id} is incomplete: missing chunks {missing:?}")]
    Incomplete { file_id: String, missing: Vec<u32> },

    #[error("Declared size {declared} bytes does not match assembled size {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("Upload {0} was aborted")]
    Aborted(String),

    #[error("Unknown upload {0}")]
    UnknownUpload(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Incomplete { file_id, missing } => {
                AppError::IncompleteUpload { file_id, missing }
            }
            TransferError::SizeMismatch { declared, actual } => {
                AppError::SizeMismatch { declared, actual }
            }
            TransferError::TooLarge { .. } | TransferError::ChunkTooLarge { .. } => {
                AppError::PayloadTooLarge(err.to_string())
            }
            TransferError::Aborted(_) => AppError::UploadAborted(err.to_string()),
            TransferError::UnknownUpload(_) => AppError::NotFound(err.to_string()),
            TransferError::Storage(e) => e.into(),
            TransferError::InvalidFileId(_)
            | TransferError::InvalidTotalChunks { .. }
            | TransferError::ChunkIndexOutOfRange { .. }
            | TransferError::TotalChunksMismatch { .. } => AppError::InvalidInput(err.to_string()),
        }
    }
}

/// Whether a chunk was new or replaced an earlier copy of the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PutStatus {
    Accepted,
    Duplicate,
}

/// Limits applied to chunked uploads
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    pub max_chunk_size: usize,
    pub max_total_chunks: u32,
    pub max_upload_size: u64,
    /// Idle uploads and tombstones older than this are swept
    pub ttl: Duration,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 16 * 1024 * 1024,
            max_total_chunks: 10_000,
            max_upload_size: 500 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// A fully assembled upload.
#[derive(Debug, Clone)]
pub struct AssembledFile {
    pub file_id: String,
    pub storage_key: String,
    pub original_filename: String,
    pub size_bytes: u64,
}

/// Snapshot of an in-progress upload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadStatus {
    pub file_id: String,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub bytes_received: u64,
    pub complete: bool,
}

struct UploadJob {
    total_chunks: u32,
    /// chunk index -> size of the last copy written
    received: BTreeMap<u32, u64>,
    last_activity: Instant,
    /// Set once assembly or abort consumed the fragments
    closed: bool,
}

impl UploadJob {
    fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            received: BTreeMap::new(),
            last_activity: Instant::now(),
            closed: false,
        }
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains_key(i))
            .collect()
    }

    fn status(&self, file_id: &str) -> UploadStatus {
        let missing = self.missing();
        UploadStatus {
            file_id: file_id.to_string(),
            total_chunks: self.total_chunks,
            received_chunks: self.received.keys().copied().collect(),
            complete: missing.is_empty(),
            missing_chunks: missing,
            bytes_received: self.received.values().sum(),
        }
    }
}

pub struct ChunkStore {
    storage: Arc<dyn Storage>,
    config: ChunkStoreConfig,
    jobs: Mutex<HashMap<String, Arc<tokio::sync::Mutex<UploadJob>>>>,
    tombstones: Mutex<HashMap<String, Instant>>,
}

impl ChunkStore {
    pub fn new(storage: Arc<dyn Storage>, config: ChunkStoreConfig) -> Self {
        Self {
            storage,
            config,
            jobs: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ChunkStoreConfig {
        &self.config
    }

    pub fn validate_file_id(file_id: &str) -> Result<(), TransferError> {
        if FILE_ID_RE
            .as_ref()
            .is_some_and(|re| re.is_match(file_id))
        {
            Ok(())
        } else {
            Err(TransferError::InvalidFileId(file_id.to_string()))
        }
    }

    fn is_aborted(&self, file_id: &str) -> bool {
        self.tombstones
            .lock()
            .map(|t| t.contains_key(file_id))
            .unwrap_or(false)
    }

    fn job(&self, file_id: &str) -> Option<Arc<tokio::sync::Mutex<UploadJob>>> {
        self.jobs.lock().ok()?.get(file_id).cloned()
    }

    fn job_or_create(
        &self,
        file_id: &str,
        total_chunks: u32,
    ) -> Result<Arc<tokio::sync::Mutex<UploadJob>>, TransferError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| StorageError::BackendError("upload registry poisoned".to_string()))?;
        Ok(jobs
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(UploadJob::new(total_chunks))))
            .clone())
    }

    fn forget(&self, file_id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.remove(file_id);
        }
    }

    /// Store one fragment. Re-sending an index overwrites the previous copy.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: Bytes,
    ) -> Result<PutStatus, TransferError> {
        Self::validate_file_id(file_id)?;

        if total_chunks == 0 || total_chunks > self.config.max_total_chunks {
            return Err(TransferError::InvalidTotalChunks {
                got: total_chunks,
                max: self.config.max_total_chunks,
            });
        }
        if chunk_index >= total_chunks {
            return Err(TransferError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }
        if data.len() > self.config.max_chunk_size {
            return Err(TransferError::ChunkTooLarge {
                size: data.len(),
                max: self.config.max_chunk_size,
            });
        }
        if self.is_aborted(file_id) {
            return Err(TransferError::Aborted(file_id.to_string()));
        }

        let mut job = loop {
            let handle = self.job_or_create(file_id, total_chunks)?;
            let job = handle.lock_owned().await;
            if !job.closed {
                break job;
            }
            // Assembled or aborted while we waited on the lock
            drop(job);
            if self.is_aborted(file_id) {
                return Err(TransferError::Aborted(file_id.to_string()));
            }
            tokio::task::yield_now().await;
        };

        if job.total_chunks != total_chunks {
            return Err(TransferError::TotalChunksMismatch {
                expected: job.total_chunks,
                got: total_chunks,
            });
        }

        let size = data.len() as u64;
        self.storage
            .upload_with_key(
                &keys::chunk_key(file_id, chunk_index),
                data,
                "application/octet-stream",
            )
            .await?;

        job.last_activity = Instant::now();
        let status = match job.received.insert(chunk_index, size) {
            Some(_) => PutStatus::Duplicate,
            None => PutStatus::Accepted,
        };

        tracing::debug!(
            file_id = %file_id,
            chunk_index,
            total_chunks,
            received = job.received.len(),
            status = ?status,
            "Chunk stored"
        );

        Ok(status)
    }

    /// Assemble an upload once every index in `[0, total_chunks)` is present.
    #[tracing::instrument(skip(self))]
    pub async fn try_assemble(
        &self,
        file_id: &str,
        original_filename: &str,
        total_chunks: u32,
        declared_size: Option<u64>,
    ) -> Result<AssembledFile, TransferError> {
        Self::validate_file_id(file_id)?;

        if self.is_aborted(file_id) {
            return Err(TransferError::Aborted(file_id.to_string()));
        }
        if total_chunks == 0 || total_chunks > self.config.max_total_chunks {
            return Err(TransferError::InvalidTotalChunks {
                got: total_chunks,
                max: self.config.max_total_chunks,
            });
        }
        if let Some(declared) = declared_size {
            if declared > self.config.max_upload_size {
                return Err(TransferError::TooLarge {
                    size: declared,
                    max: self.config.max_upload_size,
                });
            }
        }

        let Some(handle) = self.job(file_id) else {
            return Err(TransferError::Incomplete {
                file_id: file_id.to_string(),
                missing: (0..total_chunks).collect(),
            });
        };
        let mut job = handle.lock().await;

        if job.closed {
            return Err(TransferError::UnknownUpload(file_id.to_string()));
        }
        if job.total_chunks != total_chunks {
            return Err(TransferError::TotalChunksMismatch {
                expected: job.total_chunks,
                got: total_chunks,
            });
        }

        let missing = job.missing();
        if !missing.is_empty() {
            return Err(TransferError::Incomplete {
                file_id: file_id.to_string(),
                missing,
            });
        }

        // Sizes come from storage, not from bookkeeping, so an overwritten
        // fragment is counted once with its latest length.
        let chunk_keys: Vec<String> = (0..total_chunks)
            .map(|i| keys::chunk_key(file_id, i))
            .collect();
        let mut actual: u64 = 0;
        for key in &chunk_keys {
            actual += self.storage.content_length(key).await?;
        }

        if actual > self.config.max_upload_size {
            return Err(TransferError::TooLarge {
                size: actual,
                max: self.config.max_upload_size,
            });
        }
        if let Some(declared) = declared_size {
            if declared != actual {
                return Err(TransferError::SizeMismatch { declared, actual });
            }
        }

        let storage_key = keys::upload_key(original_filename);
        let written = self
            .storage
            .upload_stream(&storage_key, self.concatenated_reader(chunk_keys))
            .await;

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = self.storage.delete(&storage_key).await;
                return Err(e.into());
            }
        };
        if written != actual {
            let _ = self.storage.delete(&storage_key).await;
            return Err(TransferError::SizeMismatch {
                declared: actual,
                actual: written,
            });
        }

        job.closed = true;
        drop(job);
        self.forget(file_id);

        if let Err(e) = self
            .storage
            .delete_prefix(&keys::chunk_prefix(file_id))
            .await
        {
            tracing::warn!(file_id = %file_id, error = %e, "Failed to delete assembled chunks");
        }

        tracing::info!(
            file_id = %file_id,
            storage_key = %storage_key,
            size_bytes = written,
            total_chunks,
            "Upload assembled"
        );

        Ok(AssembledFile {
            file_id: file_id.to_string(),
            storage_key,
            original_filename: original_filename.to_string(),
            size_bytes: written,
        })
    }

    fn concatenated_reader(&self, chunk_keys: Vec<String>) -> Pin<Box<dyn AsyncRead + Send + Unpin>> {
        let storage = self.storage.clone();
        let stream = futures::stream::iter(chunk_keys)
            .then(move |key| {
                let storage = storage.clone();
                async move { storage.download_stream(&key).await }
            })
            .try_flatten()
            .map_err(std::io::Error::other);
        Box::pin(StreamReader::new(Box::pin(stream)))
    }

    /// Drop an upload: fragments are deleted and later chunks for the same
    /// id are refused. Returns whether an upload was in progress.
    pub async fn abort(&self, file_id: &str) -> Result<bool, TransferError> {
        Self::validate_file_id(file_id)?;

        if let Ok(mut tombstones) = self.tombstones.lock() {
            tombstones.insert(file_id.to_string(), Instant::now());
        }

        let existed = match self.job(file_id) {
            Some(handle) => {
                let mut job = handle.lock().await;
                job.closed = true;
                drop(job);
                self.forget(file_id);
                true
            }
            None => false,
        };

        self.storage
            .delete_prefix(&keys::chunk_prefix(file_id))
            .await?;

        tracing::info!(file_id = %file_id, existed, "Upload aborted");
        Ok(existed)
    }

    pub async fn status(&self, file_id: &str) -> Result<UploadStatus, TransferError> {
        Self::validate_file_id(file_id)?;
        if self.is_aborted(file_id) {
            return Err(TransferError::Aborted(file_id.to_string()));
        }
        let handle = self
            .job(file_id)
            .ok_or_else(|| TransferError::UnknownUpload(file_id.to_string()))?;
        let job = handle.lock().await;
        Ok(job.status(file_id))
    }

    /// Remove uploads idle for longer than the TTL and forget old tombstones.
    /// Uploads currently locked by a writer are left for the next sweep.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.config.ttl;

        let candidates: Vec<(String, Arc<tokio::sync::Mutex<UploadJob>>)> = match self.jobs.lock()
        {
            Ok(jobs) => jobs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => return 0,
        };

        let mut removed = 0;
        for (file_id, handle) in candidates {
            let Ok(mut job) = handle.try_lock() else {
                continue;
            };
            if job.closed || job.last_activity.elapsed() < ttl {
                continue;
            }
            job.closed = true;
            drop(job);
            self.forget(&file_id);

            if let Err(e) = self
                .storage
                .delete_prefix(&keys::chunk_prefix(&file_id))
                .await
            {
                tracing::warn!(file_id = %file_id, error = %e, "Failed to delete expired chunks");
            }
            removed += 1;
        }

        if let Ok(mut tombstones) = self.tombstones.lock() {
            tombstones.retain(|_, at| at.elapsed() < ttl);
        }

        if removed > 0 {
            tracing::info!(removed, "Expired uploads swept");
        }
        removed
    }

    pub fn active_uploads(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalStorage, StorageResult};
    use tempfile::tempdir;

    async fn store(config: ChunkStoreConfig) -> (tempfile::TempDir, Arc<dyn Storage>, ChunkStore) {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir.path(), "http://localhost:8000/media".to_string())
                .await
                .unwrap(),
        );
        let chunks = ChunkStore::new(storage.clone(), config);
        (dir, storage, chunks)
    }

    #[tokio::test]
    async fn out_of_order_and_duplicate_chunks_assemble_identically() {
        let (_dir, storage, chunks) = store(ChunkStoreConfig::default()).await;
        let parts: [&[u8]; 3] = [b"first-", b"second-", b"third"];

        assert_eq!(
            chunks
                .put_chunk("img1", 1, 3, Bytes::from_static(parts[1]))
                .await
                .unwrap(),
            PutStatus::Accepted
        );
        assert_eq!(
            chunks
                .put_chunk("img1", 1, 3, Bytes::from_static(parts[1]))
                .await
                .unwrap(),
            PutStatus::Duplicate
        );
        chunks
            .put_chunk("img1", 2, 3, Bytes::from_static(parts[2]))
            .await
            .unwrap();
        chunks
            .put_chunk("img1", 0, 3, Bytes::from_static(parts[0]))
            .await
            .unwrap();

        let assembled = chunks
            .try_assemble("img1", "cart.jpg", 3, Some(18))
            .await
            .unwrap();
        assert_eq!(assembled.size_bytes, 18);
        assert!(assembled.storage_key.ends_with("_cart.jpg"));

        let bytes = storage.download(&assembled.storage_key).await.unwrap();
        assert_eq!(bytes, b"first-second-third");

        // Fragments are gone after a successful assembly
        assert!(!storage.exists("chunks/img1/0.part").await.unwrap());
        assert_eq!(chunks.active_uploads(), 0);
    }

    #[tokio::test]
    async fn incomplete_assembly_keeps_fragments() {
        let (_dir, storage, chunks) = store(ChunkStoreConfig::default()).await;
        chunks
            .put_chunk("vid", 0, 3, Bytes::from_static(b"a"))
            .await
            .unwrap();
        chunks
            .put_chunk("vid", 2, 3, Bytes::from_static(b"c"))
            .await
            .unwrap();

        let err = chunks.try_assemble("vid", "v.mp4", 3, None).await.unwrap_err();
        match err {
            TransferError::Incomplete { missing, .. } => assert_eq!(missing, vec![1]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(storage.exists("chunks/vid/0.part").await.unwrap());

        chunks
            .put_chunk("vid", 1, 3, Bytes::from_static(b"b"))
            .await
            .unwrap();
        let assembled = chunks.try_assemble("vid", "v.mp4", 3, None).await.unwrap();
        assert_eq!(storage.download(&assembled.storage_key).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn finalize_without_chunks_lists_every_index() {
        let (_dir, _storage, chunks) = store(ChunkStoreConfig::default()).await;
        let err = chunks.try_assemble("ghost", "x.jpg", 2, None).await.unwrap_err();
        assert!(matches!(err, TransferError::Incomplete { ref missing, .. } if missing == &vec![0, 1]));
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected_and_retryable() {
        let (_dir, storage, chunks) = store(ChunkStoreConfig::default()).await;
        chunks
            .put_chunk("sz", 0, 1, Bytes::from_static(b"12345"))
            .await
            .unwrap();

        let err = chunks.try_assemble("sz", "a.png", 1, Some(9)).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                declared: 9,
                actual: 5
            }
        ));
        assert!(storage.exists("chunks/sz/0.part").await.unwrap());

        assert!(chunks.try_assemble("sz", "a.png", 1, Some(5)).await.is_ok());
    }

    #[tokio::test]
    async fn chunk_validation() {
        let config = ChunkStoreConfig {
            max_chunk_size: 4,
            max_total_chunks: 10,
            ..Default::default()
        };
        let (_dir, _storage, chunks) = store(config).await;

        let r = chunks.put_chunk("bad id!", 0, 1, Bytes::new()).await;
        assert!(matches!(r, Err(TransferError::InvalidFileId(_))));

        let r = chunks.put_chunk("ok", 3, 3, Bytes::new()).await;
        assert!(matches!(r, Err(TransferError::ChunkIndexOutOfRange { .. })));

        let r = chunks.put_chunk("ok", 0, 11, Bytes::new()).await;
        assert!(matches!(r, Err(TransferError::InvalidTotalChunks { .. })));

        let r = chunks
            .put_chunk("ok", 0, 2, Bytes::from_static(b"too long"))
            .await;
        assert!(matches!(r, Err(TransferError::ChunkTooLarge { .. })));

        chunks
            .put_chunk("ok", 0, 2, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let r = chunks.put_chunk("ok", 1, 3, Bytes::from_static(b"c")).await;
        assert!(matches!(
            r,
            Err(TransferError::TotalChunksMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[tokio::test]
    async fn abort_tombstones_the_upload() {
        let (_dir, storage, chunks) = store(ChunkStoreConfig::default()).await;
        chunks
            .put_chunk("gone", 0, 2, Bytes::from_static(b"a"))
            .await
            .unwrap();

        assert!(chunks.abort("gone").await.unwrap());
        assert!(!storage.exists("chunks/gone/0.part").await.unwrap());

        let r = chunks.put_chunk("gone", 1, 2, Bytes::from_static(b"b")).await;
        assert!(matches!(r, Err(TransferError::Aborted(_))));
        let r = chunks.try_assemble("gone", "a.jpg", 2, None).await;
        assert!(matches!(r, Err(TransferError::Aborted(_))));
    }

    #[tokio::test]
    async fn status_reports_missing_chunks() {
        let (_dir, _storage, chunks) = store(ChunkStoreConfig::default()).await;
        chunks
            .put_chunk("st", 2, 4, Bytes::from_static(b"xyz"))
            .await
            .unwrap();

        let status = chunks.status("st").await.unwrap();
        assert_eq!(status.received_chunks, vec![2]);
        assert_eq!(status.missing_chunks, vec![0, 1, 3]);
        assert_eq!(status.bytes_received, 3);
        assert!(!status.complete);

        assert!(matches!(
            chunks.status("unknown").await,
            Err(TransferError::UnknownUpload(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_idle_uploads() {
        let config = ChunkStoreConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        let (_dir, storage, chunks) = store(config).await;
        chunks
            .put_chunk("idle", 0, 2, Bytes::from_static(b"a"))
            .await
            .unwrap();

        assert_eq!(chunks.sweep_expired().await, 1);
        assert_eq!(chunks.active_uploads(), 0);
        assert!(!storage.exists("chunks/idle/0.part").await.unwrap());
    }

    /// Local storage whose next fragment write is cut off mid-body.
    struct InterruptedWrites {
        inner: LocalStorage,
        interrupt_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Storage for InterruptedWrites {
        async fn upload_with_key(
            &self,
            storage_key: &str,
            data: Bytes,
            content_type: &str,
        ) -> StorageResult<String> {
            use std::sync::atomic::Ordering;
            if self.interrupt_next.swap(false, Ordering::SeqCst) {
                self.inner
                    .upload_stream(storage_key, crate::local::tests::interrupted_body(b"par"))
                    .await?;
                return Ok(String::new());
            }
            self.inner.upload_with_key(storage_key, data, content_type).await
        }

        async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
            self.inner.download(storage_key).await
        }

        async fn delete(&self, storage_key: &str) -> StorageResult<()> {
            self.inner.delete(storage_key).await
        }

        async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
            self.inner.delete_prefix(prefix).await
        }

        async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
            self.inner.exists(storage_key).await
        }

        async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
            self.inner.content_length(storage_key).await
        }

        async fn upload_stream(
            &self,
            storage_key: &str,
            reader: std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send + Unpin>>,
        ) -> StorageResult<u64> {
            self.inner.upload_stream(storage_key, reader).await
        }

        async fn download_stream(&self, storage_key: &str) -> StorageResult<crate::ByteStream> {
            self.inner.download_stream(storage_key).await
        }

        fn local_path(&self, storage_key: &str) -> StorageResult<Option<std::path::PathBuf>> {
            self.inner.local_path(storage_key)
        }

        fn url_for(&self, storage_key: &str) -> String {
            self.inner.url_for(storage_key)
        }
    }

    #[tokio::test]
    async fn failed_resend_keeps_the_received_chunk() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(InterruptedWrites {
            inner: LocalStorage::new(dir.path(), "http://localhost:8000/media".to_string())
                .await
                .unwrap(),
            interrupt_next: std::sync::atomic::AtomicBool::new(false),
        });
        let chunks = ChunkStore::new(storage.clone(), ChunkStoreConfig::default());

        chunks
            .put_chunk("rs", 0, 2, Bytes::from_static(b"head-"))
            .await
            .unwrap();
        storage
            .interrupt_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let resend = chunks.put_chunk("rs", 0, 2, Bytes::from_static(b"head-")).await;
        assert!(resend.is_err());

        chunks
            .put_chunk("rs", 1, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();
        let assembled = chunks.try_assemble("rs", "a.png", 2, None).await.unwrap();
        assert_eq!(
            storage.download(&assembled.storage_key).await.unwrap(),
            b"head-tail"
        );
    }

    #[test]
    fn transfer_errors_map_to_app_errors() {
        let err: AppError = TransferError::Incomplete {
            file_id: "f".to_string(),
            missing: vec![2],
        }
        .into();
        assert!(matches!(err, AppError::IncompleteUpload { .. }));

        let err: AppError = TransferError::Aborted("f".to_string()).into();
        assert!(matches!(err, AppError::UploadAborted(_)));

        let err: AppError = TransferError::ChunkTooLarge { size: 10, max: 1 }.into();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
    }
}
