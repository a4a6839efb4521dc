//! Vagon Infrastructure Library
//!
//! Shared infrastructure for the detection service: request middleware,
//! tracing setup, the upload expiry sweeper and host introspection.

#[cfg(feature = "middleware")]
pub mod middleware;

pub mod telemetry;

pub mod error;

#[cfg(feature = "cleanup")]
pub mod cleanup;

#[cfg(feature = "system")]
pub mod system;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{request_id_middleware, security_headers_middleware, RequestId};

pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use error::ErrorResponse;

#[cfg(feature = "cleanup")]
pub use cleanup::UploadSweeper;

#[cfg(feature = "system")]
pub use system::{detect_video_devices, SystemInfo};
