//! Vagon Storage Library
//!
//! Object storage abstraction plus the chunked upload store.
//!
//! # Storage key layout
//!
//! - `chunks/{file_id}/{index}.part` upload fragments, removed after assembly
//! - `uploads/{uuid}_{filename}` assembled uploads
//! - `frames/{processing_id}.jpg` frames that produced a persisted detection
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the
//! `keys` module so every caller agrees on the layout.

pub mod chunks;
pub mod keys;
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use chunks::{
    AssembledFile, ChunkStore, ChunkStoreConfig, PutStatus, TransferError, UploadStatus,
};
pub use local::LocalStorage;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
