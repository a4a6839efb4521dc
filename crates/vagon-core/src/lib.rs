//! Vagon Core Library
//!
//! Domain models, error types and configuration shared by every crate of the
//! vagoneta detection service.

pub mod config;
pub mod error;
pub mod models;
pub mod vocabulary;

// Re-export commonly used types
pub use config::{BaseConfig, Config, DetectionServiceConfig, StoreBackend};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use vocabulary::NumberVocabulary;
