//! Application state and sub-state extractors.
//!
//! AppState is split into domain sub-states so handlers can extract only what
//! they need via Axum's `FromRef`.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use vagon_core::Config;
use vagon_db::VagonetaRepository;
use vagon_processing::FrameExtractor;
use vagon_storage::{ChunkStore, Storage};

use crate::broadcast::DetectionBroadcaster;
use crate::detection::DetectionContext;
use crate::monitor::MonitorRegistry;
use crate::pipeline::Pipeline;
use crate::progress::ProgressHub;
use crate::queue::ProcessingQueue;
use crate::recorder::EventRecorder;

/// Object storage and the chunked upload store.
#[derive(Clone)]
pub struct UploadState {
    pub storage: Arc<dyn Storage>,
    pub chunk_store: Arc<ChunkStore>,
}

/// Upload analysis, job queue and per-job progress.
#[derive(Clone)]
pub struct ProcessingState {
    pub pipeline: Pipeline,
    pub queue: ProcessingQueue,
    pub hub: Arc<ProgressHub>,
    pub extractor: Arc<FrameExtractor>,
}

/// Persisted records and their live fan-out.
#[derive(Clone)]
pub struct RecordState {
    pub repository: Arc<dyn VagonetaRepository>,
    pub recorder: EventRecorder,
    pub broadcaster: DetectionBroadcaster,
}

pub struct AppState {
    pub uploads: UploadState,
    pub processing: ProcessingState,
    pub records: RecordState,
    pub detection: DetectionContext,
    pub monitors: Arc<MonitorRegistry>,
    pub config: Config,
    pub is_production: bool,
    pub started_at: Instant,
    /// Stops background tasks (upload sweeper, job evictor) on shutdown
    pub shutdown: CancellationToken,
}

// ----- FromRef for sub-state extraction -----

impl axum::extract::FromRef<Arc<AppState>> for UploadState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.uploads.clone()
    }
}

impl axum::extract::FromRef<Arc<AppState>> for ProcessingState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.processing.clone()
    }
}

impl axum::extract::FromRef<Arc<AppState>> for RecordState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.records.clone()
    }
}

impl axum::extract::FromRef<Arc<AppState>> for DetectionContext {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.detection.clone()
    }
}
