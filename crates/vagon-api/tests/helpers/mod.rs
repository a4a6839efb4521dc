//! Test helpers: build the real router over in-memory backends.
//!
//! Records live in memory, media in a temp dir, and detections come from a
//! recognizer the test scripts. No Docker or network is needed.

#![allow(dead_code)]

pub mod fixtures;
#[cfg(unix)]
pub mod video;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use image::RgbImage;
use tempfile::TempDir;
use vagon_api::setup::{self, services::Backends};
use vagon_api::state::AppState;
use vagon_core::models::{BoundingBox, DetectionMode};
use vagon_core::{BaseConfig, Config, DetectionServiceConfig, StoreBackend};
use vagon_db::{InMemoryVagonetaRepository, VagonetaRepository};
use vagon_processing::{DetectionError, NumberRecognizer, RawDetection};
use vagon_storage::{LocalStorage, Storage};

/// Recognizer whose answer the test controls.
#[derive(Default)]
pub struct ScriptedRecognizer {
    detections: Mutex<Vec<RawDetection>>,
    /// Answers for the next calls, in order; `detections` once drained
    queued: Mutex<VecDeque<Vec<RawDetection>>>,
}

impl ScriptedRecognizer {
    pub fn answer(&self, detections: Vec<RawDetection>) {
        *self.detections.lock().unwrap() = detections;
    }

    /// One answer per call, e.g. one per video frame.
    pub fn answer_each(&self, answers: Vec<Vec<RawDetection>>) {
        *self.queued.lock().unwrap() = answers.into();
    }
}

#[async_trait]
impl NumberRecognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        _image: &RgbImage,
        _min_confidence: f32,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(self.detections.lock().unwrap().clone())
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }

    fn model_type(&self) -> String {
        "scripted".to_string()
    }
}

pub fn detection(label: &str, confidence: f32, x: f32) -> RawDetection {
    RawDetection {
        label: label.to_string(),
        confidence,
        bbox: BoundingBox::new(x, 20.0, x + 20.0, 60.0),
    }
}

pub fn test_config(storage_path: &Path) -> Config {
    Config(Box::new(DetectionServiceConfig {
        base: BaseConfig {
            server_port: 0,
            cors_origins: vec!["*".to_string()],
            db_max_connections: 1,
            db_timeout_seconds: 5,
            environment: "test".to_string(),
            log_format: "text".to_string(),
            http_concurrency_limit: 64,
        },
        store_backend: StoreBackend::Memory,
        database_url: None,
        local_storage_path: storage_path.to_path_buf(),
        media_base_url: "http://localhost/media".to_string(),
        max_upload_size_bytes: 10 * 1024 * 1024,
        max_chunk_size_bytes: 1024 * 1024,
        max_total_chunks: 100,
        upload_ttl_secs: 3600,
        // Never resolvable, so video jobs and camera sources fail fast
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        ffprobe_path: "/nonexistent/ffprobe".to_string(),
        video_sample_fps: 1.0,
        video_max_sampled_frames: 10,
        max_concurrent_jobs: 1,
        job_queue_size: 4,
        job_retention_secs: 60,
        detector_url: None,
        detector_timeout_secs: 5,
        min_confidence: 0.25,
        umbral_agrupacion: 50.0,
        usar_agrupacion: true,
        modo_deteccion: DetectionMode::Standard,
        vocabulary_strict: true,
        cameras_config_path: None,
        capture_width: 320,
        capture_height: 240,
    }))
}

/// Test application: server plus the handles tests inspect.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub repository: Arc<InMemoryVagonetaRepository>,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Like [`setup_test_app`], with the config adjusted before the app is built.
pub async fn setup_test_app_with(customize: impl FnOnce(&mut DetectionServiceConfig)) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let mut config = test_config(temp_dir.path());
    customize(&mut config.0);

    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path(), "http://localhost/media".to_string())
            .await
            .expect("Failed to create local storage"),
    );
    let repository = Arc::new(InMemoryVagonetaRepository::new());
    let recognizer = Arc::new(ScriptedRecognizer::default());

    let (state, router) = setup::build_app(
        &config,
        Backends {
            repository: repository.clone() as Arc<dyn VagonetaRepository>,
            storage,
            recognizer: recognizer.clone() as Arc<dyn NumberRecognizer>,
        },
    )
    .await
    .expect("Failed to build app");

    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        state,
        repository,
        recognizer,
        _temp_dir: temp_dir,
    }
}
