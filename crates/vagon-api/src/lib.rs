//! Vagon API
//!
//! HTTP service for vagoneta number detection: chunked uploads, video
//! processing jobs with streamed progress, continuous camera monitoring and
//! the append-only detection history.

pub mod api_doc;
pub mod broadcast;
pub mod detection;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod recorder;
pub mod setup;
pub mod state;
