//! Service initialization and application state setup

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use vagon_core::{Config, NumberVocabulary};
use vagon_db::VagonetaRepository;
use vagon_infra::UploadSweeper;
use vagon_processing::{
    DetectionAggregator, Detector, FrameExtractor, FrameExtractorConfig, HttpRecognizer,
    NumberRecognizer, UnconfiguredRecognizer,
};
use vagon_storage::{ChunkStore, ChunkStoreConfig, Storage};

use crate::broadcast::DetectionBroadcaster;
use crate::detection::DetectionContext;
use crate::monitor::{load_cameras, MonitorDeps, MonitorRegistry, MonitorSettings};
use crate::pipeline::Pipeline;
use crate::progress::ProgressHub;
use crate::queue::ProcessingQueue;
use crate::recorder::EventRecorder;
use crate::state::{AppState, ProcessingState, RecordState, UploadState};

const JOB_EVICTION_PERIOD: Duration = Duration::from_secs(30);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// External backends the services are built on. Tests swap these for
/// in-memory and scripted implementations.
pub struct Backends {
    pub repository: Arc<dyn VagonetaRepository>,
    pub storage: Arc<dyn Storage>,
    pub recognizer: Arc<dyn NumberRecognizer>,
}

/// Recognizer for `DETECTOR_URL`, or a stand-in that fails every frame
pub fn setup_recognizer(config: &Config) -> Result<Arc<dyn NumberRecognizer>> {
    match config.detector_url() {
        Some(url) => {
            let recognizer = HttpRecognizer::new(
                url,
                Duration::from_secs(config.detector_timeout_secs()),
            )
            .context("Failed to build detector client")?;
            tracing::info!(url = %url, "Remote detector configured");
            Ok(Arc::new(recognizer))
        }
        None => {
            tracing::warn!("DETECTOR_URL not set; every detection will fail");
            Ok(Arc::new(UnconfiguredRecognizer))
        }
    }
}

/// Initialize all services, returning the application state
pub async fn initialize_services(config: &Config, backends: Backends) -> Result<Arc<AppState>> {
    let Backends {
        repository,
        storage,
        recognizer,
    } = backends;
    let shutdown = CancellationToken::new();

    let chunk_store = Arc::new(ChunkStore::new(
        storage.clone(),
        ChunkStoreConfig {
            max_chunk_size: config.max_chunk_size_bytes(),
            max_total_chunks: config.max_total_chunks(),
            max_upload_size: config.max_upload_size_bytes(),
            ttl: Duration::from_secs(config.upload_ttl_secs()),
        },
    ));
    let sweep_period = Duration::from_secs(config.upload_ttl_secs() / 2)
        .clamp(Duration::from_secs(1), MAX_SWEEP_PERIOD);
    UploadSweeper::new(chunk_store.clone(), sweep_period).spawn(shutdown.child_token());

    let vocabulary = Arc::new(NumberVocabulary::with_default_classes(
        config.vocabulary_strict(),
    ));
    let detection = DetectionContext::new(
        Detector::new(recognizer),
        DetectionAggregator::new(vocabulary),
        config.detector_settings(),
    );

    let extractor = Arc::new(FrameExtractor::new(FrameExtractorConfig {
        ffmpeg_path: config.ffmpeg_path().to_string(),
        ffprobe_path: config.ffprobe_path().to_string(),
        sample_fps: config.video_sample_fps(),
        max_sampled_frames: config.video_max_sampled_frames(),
    }));

    let broadcaster = DetectionBroadcaster::new();
    let recorder = EventRecorder::new(repository.clone(), broadcaster.clone());

    let hub = Arc::new(ProgressHub::new(Duration::from_secs(
        config.job_retention_secs(),
    )));
    hub.clone()
        .spawn_evictor(JOB_EVICTION_PERIOD, shutdown.child_token());

    let pipeline = Pipeline::new(
        detection.clone(),
        extractor.clone(),
        storage.clone(),
        recorder.clone(),
        hub.clone(),
    );
    let queue = ProcessingQueue::start(
        pipeline.clone(),
        config.job_queue_size(),
        config.max_concurrent_jobs(),
    );

    let cameras = load_cameras(config.cameras_config_path().map(|p| p.as_path()))
        .await
        .context("Failed to load camera configuration")?;
    let monitors = Arc::new(MonitorRegistry::new(
        cameras,
        MonitorDeps {
            extractor: extractor.clone(),
            detection: detection.clone(),
            storage: storage.clone(),
            recorder: recorder.clone(),
        },
        MonitorSettings {
            capture_size: config.capture_size(),
            ..MonitorSettings::default()
        },
    ));
    tracing::info!(cameras = monitors.cameras().len(), "Camera registry ready");

    Ok(Arc::new(AppState {
        uploads: UploadState {
            storage,
            chunk_store,
        },
        processing: ProcessingState {
            pipeline,
            queue,
            hub,
            extractor,
        },
        records: RecordState {
            repository,
            recorder,
            broadcaster,
        },
        detection,
        monitors,
        is_production: config.is_production(),
        config: config.clone(),
        started_at: Instant::now(),
        shutdown,
    }))
}
