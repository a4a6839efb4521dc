//! Continuous camera monitoring.
//!
//! Each configured camera has one slot holding at most one running session.
//! The slot's mutex is held across start and stop, so a camera device is
//! never opened twice and a restarted session only begins once the previous
//! one released its source.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;
use vagon_core::models::{CameraConfig, EventMetadata, OrigenDeteccion, SourceType};
use vagon_core::models::Evento;
use vagon_core::AppError;
use vagon_processing::{crop_roi, encode_jpeg, Composite, Frame, FrameExtractor, MotionGate};
use vagon_storage::{keys, Storage};

use crate::detection::DetectionContext;
use crate::recorder::{AcceptedDetection, EventRecorder};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CameraStats {
    pub frames_processed: u64,
    pub motion_detected: u64,
    pub vagonetas_detected: u64,
    pub false_positives: u64,
    pub video_loops: u64,
    pub last_detection: Option<DateTime<Utc>>,
    pub last_numero: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CameraStatus {
    pub camera_id: String,
    pub is_running: bool,
    pub source_type: SourceType,
    pub evento: Evento,
    pub tunel: Option<String>,
    pub stats: CameraStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitorAction {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MonitorResponse {
    pub status: MonitorAction,
    pub camera_id: String,
}

/// Session tunables shared by every camera.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub capture_size: (u32, u32),
    /// Consecutive source failures before a session gives up
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Pre-capture ring buffer length
    pub buffer_size: usize,
    /// Buffered frames analysed together with the triggering frame
    pub lookback: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            capture_size: (1280, 720),
            max_retries: 5,
            retry_backoff: Duration::from_secs(2),
            buffer_size: 10,
            lookback: 3,
        }
    }
}

/// Services a monitor session uses.
#[derive(Clone)]
pub struct MonitorDeps {
    pub extractor: Arc<FrameExtractor>,
    pub detection: DetectionContext,
    pub storage: Arc<dyn Storage>,
    pub recorder: EventRecorder,
}

/// Read camera definitions from a JSON array, or fall back to the built-in
/// sample cameras.
pub async fn load_cameras(path: Option<&Path>) -> anyhow::Result<Vec<CameraConfig>> {
    let Some(path) = path else {
        tracing::info!("No camera file configured, using built-in cameras");
        return Ok(CameraConfig::defaults());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read camera file {}", path.display()))?;
    let cameras: Vec<CameraConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid camera file {}", path.display()))?;
    tracing::info!(count = cameras.len(), path = %path.display(), "Cameras loaded");
    Ok(cameras)
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct CameraSlot {
    config: CameraConfig,
    session: tokio::sync::Mutex<Option<Session>>,
    stats: Arc<Mutex<CameraStats>>,
}

pub struct MonitorRegistry {
    slots: Vec<Arc<CameraSlot>>,
    deps: MonitorDeps,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

impl MonitorRegistry {
    pub fn new(cameras: Vec<CameraConfig>, deps: MonitorDeps, settings: MonitorSettings) -> Self {
        let mut slots: Vec<Arc<CameraSlot>> = Vec::with_capacity(cameras.len());
        for config in cameras {
            if slots.iter().any(|s| s.config.camera_id == config.camera_id) {
                tracing::warn!(camera_id = %config.camera_id, "Duplicate camera id ignored");
                continue;
            }
            slots.push(Arc::new(CameraSlot {
                config,
                session: tokio::sync::Mutex::new(None),
                stats: Arc::new(Mutex::new(CameraStats::default())),
            }));
        }
        Self {
            slots,
            deps,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    fn slot(&self, camera_id: &str) -> Result<&Arc<CameraSlot>, AppError> {
        self.slots
            .iter()
            .find(|s| s.config.camera_id == camera_id)
            .ok_or_else(|| AppError::NotFound(format!("Camera {} not found", camera_id)))
    }

    pub fn cameras(&self) -> Vec<CameraConfig> {
        self.slots.iter().map(|s| s.config.clone()).collect()
    }

    #[tracing::instrument(skip(self))]
    pub async fn start(&self, camera_id: &str) -> Result<MonitorAction, AppError> {
        let slot = self.slot(camera_id)?;
        let mut session = slot.session.lock().await;
        if session.as_ref().is_some_and(Session::is_alive) {
            tracing::info!("Monitor already running");
            return Ok(MonitorAction::AlreadyRunning);
        }

        let cancel = self.shutdown.child_token();
        let worker = MonitorWorker::new(
            slot.config.clone(),
            self.deps.clone(),
            slot.stats.clone(),
            &self.settings,
        );
        let handle = tokio::spawn(run_session(
            worker,
            self.deps.extractor.clone(),
            self.settings.clone(),
            cancel.clone(),
        ));
        *session = Some(Session { cancel, handle });

        tracing::info!(source = %slot.config.ffmpeg_input(), "Monitor started");
        Ok(MonitorAction::Started)
    }

    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, camera_id: &str) -> Result<MonitorAction, AppError> {
        let slot = self.slot(camera_id)?;
        let mut session = slot.session.lock().await;
        match session.take() {
            Some(s) if s.is_alive() => {
                s.cancel.cancel();
                let mut handle = s.handle;
                if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                    tracing::warn!("Monitor session did not stop in time, aborting");
                    handle.abort();
                }
                tracing::info!("Monitor stopped");
                Ok(MonitorAction::Stopped)
            }
            _ => Ok(MonitorAction::NotRunning),
        }
    }

    async fn status_of(&self, slot: &CameraSlot) -> CameraStatus {
        let is_running = slot.session.lock().await.as_ref().is_some_and(Session::is_alive);
        let stats = slot
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        CameraStatus {
            camera_id: slot.config.camera_id.clone(),
            is_running,
            source_type: slot.config.source_type,
            evento: slot.config.evento,
            tunel: slot.config.tunel.clone(),
            stats,
        }
    }

    pub async fn status(&self, camera_id: &str) -> Result<CameraStatus, AppError> {
        let slot = self.slot(camera_id)?;
        Ok(self.status_of(slot).await)
    }

    pub async fn statuses(&self) -> Vec<CameraStatus> {
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            out.push(self.status_of(slot).await);
        }
        out
    }

    pub async fn active_count(&self) -> usize {
        let mut count = 0;
        for slot in &self.slots {
            if slot.session.lock().await.as_ref().is_some_and(Session::is_alive) {
                count += 1;
            }
        }
        count
    }

    /// Stop every session; used on shutdown.
    pub async fn stop_all(&self) {
        self.shutdown.cancel();
        for slot in &self.slots {
            if let Err(e) = self.stop(&slot.config.camera_id).await {
                tracing::warn!(error = %e, "Failed to stop monitor");
            }
        }
    }
}

/// What happened to one live frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameVerdict {
    /// No significant motion
    Idle,
    /// Motion ignored while a recent detection cools down
    Cooldown,
    Recorded { numero: String },
    /// Motion without an accepted number
    FalsePositive,
    /// A number was accepted but the record could not be written
    PersistFailed,
}

/// Per-session frame handling: ROI crop, pre-capture buffer, motion gate,
/// detection over recent frames and recording.
pub struct MonitorWorker {
    camera: CameraConfig,
    deps: MonitorDeps,
    stats: Arc<Mutex<CameraStats>>,
    gate: MotionGate,
    buffer: VecDeque<RgbImage>,
    buffer_size: usize,
    lookback: usize,
    cooldown_until: Option<Instant>,
    frame_counter: u64,
}

impl MonitorWorker {
    pub fn new(
        camera: CameraConfig,
        deps: MonitorDeps,
        stats: Arc<Mutex<CameraStats>>,
        settings: &MonitorSettings,
    ) -> Self {
        let gate = MotionGate::new(camera.motion_sensitivity, camera.min_motion_area);
        Self {
            camera,
            deps,
            stats,
            gate,
            buffer: VecDeque::with_capacity(settings.buffer_size),
            buffer_size: settings.buffer_size.max(1),
            lookback: settings.lookback,
            cooldown_until: None,
            frame_counter: 0,
        }
    }

    fn update_stats<F: FnOnce(&mut CameraStats)>(&self, f: F) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Forget the previous frame after the source was reopened.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.buffer.clear();
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_until.is_some_and(|until| Instant::now() < until)
    }

    fn start_cooldown(&mut self) {
        let secs = self.camera.detection_cooldown_secs.max(0.0);
        self.cooldown_until = Some(Instant::now() + Duration::from_secs_f64(secs));
    }

    pub async fn handle_frame(&mut self, image: RgbImage) -> FrameVerdict {
        let image = match &self.camera.roi {
            Some(roi) => crop_roi(&image, roi),
            None => image,
        };
        self.frame_counter += 1;
        self.update_stats(|s| s.frames_processed += 1);

        // The gate sees every frame so its reference stays current
        let motion = self.gate.should_analyze(&image);
        if self.buffer.len() >= self.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(image);

        if self.in_cooldown() {
            return FrameVerdict::Cooldown;
        }
        if !motion {
            return FrameVerdict::Idle;
        }
        self.update_stats(|s| s.motion_detected += 1);

        let settings = self.deps.detection.settings();
        let detector = self.deps.detection.detector();
        let aggregator = self.deps.detection.aggregator();

        // Newest first: the triggering frame, then the lookback frames
        let recent: Vec<RgbImage> = self
            .buffer
            .iter()
            .rev()
            .take(self.lookback + 1)
            .cloned()
            .collect();

        let mut best: Option<(Composite, RgbImage)> = None;
        let mut failures = 0usize;
        for image in recent {
            let frame = Frame {
                index: self.frame_counter,
                position_secs: 0.0,
                image,
            };
            match detector.detect(&frame, &settings).await {
                Ok(events) => {
                    if let Some(candidate) = aggregator.best_composite(&events, &settings) {
                        if best
                            .as_ref()
                            .is_none_or(|(b, _)| candidate.confianza > b.confianza)
                        {
                            best = Some((candidate, frame.image));
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::debug!(camera_id = %self.camera.camera_id, error = %e, "Detection failed on live frame");
                }
            }
        }

        let Some((composite, image)) = best else {
            self.update_stats(|s| s.false_positives += 1);
            tracing::debug!(
                camera_id = %self.camera.camera_id,
                failures,
                "Motion without an accepted number"
            );
            return FrameVerdict::FalsePositive;
        };

        let media_reference = self.store_frame(image).await;
        let metadata = EventMetadata {
            evento: self.camera.evento,
            tunel: self.camera.tunel.clone(),
            modelo_ladrillo: None,
            merma: None,
        };
        let accepted = AcceptedDetection {
            numero: composite.numero.clone(),
            confianza: composite.confianza,
            origen: OrigenDeteccion::Auto,
            media_reference,
        };
        self.start_cooldown();

        match self.deps.recorder.record(accepted, &metadata).await {
            Ok(record) => {
                self.update_stats(|s| {
                    s.vagonetas_detected += 1;
                    s.last_detection = Some(record.timestamp);
                    s.last_numero = Some(record.numero.clone());
                });
                tracing::info!(
                    camera_id = %self.camera.camera_id,
                    numero = %record.numero,
                    confianza = record.confianza,
                    "Vagoneta detected by monitor"
                );
                FrameVerdict::Recorded {
                    numero: record.numero,
                }
            }
            Err(e) => {
                tracing::error!(camera_id = %self.camera.camera_id, error = %e, "Failed to persist monitor detection");
                self.update_stats(|s| s.last_error = Some(e.to_string()));
                FrameVerdict::PersistFailed
            }
        }
    }

    async fn store_frame(&self, image: RgbImage) -> String {
        let key = keys::frame_key(Uuid::new_v4());
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&image, 90)).await;
        let stored = match encoded {
            Ok(Ok(bytes)) => self
                .deps
                .storage
                .upload_with_key(&key, Bytes::from(bytes), "image/jpeg")
                .await
                .map_err(|e| e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match stored {
            Ok(_) => key,
            Err(e) => {
                tracing::warn!(camera_id = %self.camera.camera_id, error = %e, "Failed to store detection frame");
                // The record still names its source
                self.camera.ffmpeg_input()
            }
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[tracing::instrument(skip_all, fields(camera_id = %worker.camera.camera_id))]
async fn run_session(
    mut worker: MonitorWorker,
    extractor: Arc<FrameExtractor>,
    settings: MonitorSettings,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    while !cancel.is_cancelled() {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = extractor.open_camera(&worker.camera, settings.capture_size) => opened,
        };

        let mut got_frame = false;
        match opened {
            Ok(mut stream) => {
                tracing::info!(dimensions = ?stream.dimensions(), "Camera source opened");
                worker.reset();
                let mut cancelled = false;
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => {
                            cancelled = true;
                            break;
                        }
                        next = stream.next_frame() => next,
                    };
                    match next {
                        Ok(Some(frame)) => {
                            got_frame = true;
                            failures = 0;
                            worker.handle_frame(frame.image).await;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Camera source failed");
                            worker.update_stats(|s| s.last_error = Some(e.to_string()));
                            break;
                        }
                    }
                }
                stream.close().await;
                if cancelled {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open camera source");
                worker.update_stats(|s| s.last_error = Some(e.to_string()));
            }
        }

        if worker.camera.is_file_source() && got_frame {
            if !worker.camera.loop_video {
                tracing::info!("Video source finished");
                break;
            }
            worker.update_stats(|s| s.video_loops += 1);
            tracing::debug!("Video source looped");
            continue;
        }

        failures += 1;
        if failures >= settings.max_retries {
            tracing::error!(failures, "Camera source unavailable, monitor stopping");
            break;
        }
        let backoff = (settings.retry_backoff * failures).min(MAX_BACKOFF);
        if !sleep_or_cancel(backoff, &cancel).await {
            break;
        }
    }

    tracing::info!("Monitor session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use vagon_core::models::{BoundingBox, CameraUrl, DetectorSettings};
    use vagon_core::NumberVocabulary;
    use vagon_db::InMemoryVagonetaRepository;
    use vagon_processing::{
        DetectionAggregator, DetectionError, Detector, FrameExtractorConfig, NumberRecognizer,
        RawDetection,
    };
    use vagon_storage::LocalStorage;

    use crate::broadcast::{BroadcastKind, DetectionBroadcaster};

    struct StaticRecognizer(Vec<RawDetection>);

    #[async_trait]
    impl NumberRecognizer for StaticRecognizer {
        async fn recognize(
            &self,
            _image: &RgbImage,
            _min_confidence: f32,
        ) -> Result<Vec<RawDetection>, DetectionError> {
            Ok(self.0.clone())
        }

        fn backend_name(&self) -> &'static str {
            "static"
        }

        fn model_type(&self) -> String {
            "static".to_string()
        }
    }

    fn camera(id: &str) -> CameraConfig {
        CameraConfig {
            camera_id: id.to_string(),
            source_type: SourceType::Camera,
            camera_url: CameraUrl::Index(7),
            evento: Evento::Egreso,
            tunel: Some("Túnel 2".to_string()),
            roi: None,
            motion_sensitivity: 0.3,
            min_motion_area: 100,
            detection_cooldown_secs: 60.0,
            fps_limit: 5.0,
            loop_video: false,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        repo: Arc<InMemoryVagonetaRepository>,
        broadcaster: DetectionBroadcaster,
        deps: MonitorDeps,
    }

    async fn harness(detections: Vec<RawDetection>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir.path(), "http://localhost/media".to_string())
                .await
                .unwrap(),
        );
        let repo = Arc::new(InMemoryVagonetaRepository::new());
        let broadcaster = DetectionBroadcaster::new();
        let detection = DetectionContext::new(
            Detector::new(Arc::new(StaticRecognizer(detections))),
            DetectionAggregator::new(Arc::new(NumberVocabulary::with_default_classes(true))),
            DetectorSettings::default(),
        );
        let deps = MonitorDeps {
            extractor: Arc::new(FrameExtractor::new(FrameExtractorConfig {
                // Never spawned successfully in these tests
                ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
                ..Default::default()
            })),
            detection,
            storage,
            recorder: EventRecorder::new(repo.clone(), broadcaster.clone()),
        };
        Harness {
            _dir: dir,
            repo,
            broadcaster,
            deps,
        }
    }

    fn plain() -> RgbImage {
        RgbImage::from_pixel(64, 64, Rgb([10, 10, 10]))
    }

    fn with_block() -> RgbImage {
        let mut img = plain();
        for y in 10..50 {
            for x in 10..50 {
                img.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        img
    }

    fn cart_number() -> RawDetection {
        RawDetection {
            label: "012".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(10.0, 10.0, 30.0, 40.0),
        }
    }

    #[tokio::test]
    async fn motion_with_number_records_once_then_cools_down() {
        let h = harness(vec![cart_number()]).await;
        let mut rx = h.broadcaster.subscribe();
        let stats = Arc::new(Mutex::new(CameraStats::default()));
        let mut worker = MonitorWorker::new(
            camera("cam_test"),
            h.deps.clone(),
            stats.clone(),
            &MonitorSettings::default(),
        );

        assert_eq!(worker.handle_frame(plain()).await, FrameVerdict::Idle);
        assert_eq!(
            worker.handle_frame(with_block()).await,
            FrameVerdict::Recorded {
                numero: "012".to_string()
            }
        );
        assert_eq!(worker.handle_frame(plain()).await, FrameVerdict::Cooldown);

        assert_eq!(h.repo.len().await, 1);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.kind, BroadcastKind::MonitorDetection);
        assert_eq!(msg.data.origen_deteccion, OrigenDeteccion::Auto);
        assert_eq!(msg.data.evento, Evento::Egreso);
        assert!(msg.data.media_reference.starts_with("frames/"));

        let stats = stats.lock().unwrap().clone();
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.motion_detected, 1);
        assert_eq!(stats.vagonetas_detected, 1);
        assert_eq!(stats.last_numero.as_deref(), Some("012"));
    }

    #[tokio::test]
    async fn motion_without_number_is_a_false_positive() {
        let h = harness(Vec::new()).await;
        let stats = Arc::new(Mutex::new(CameraStats::default()));
        let mut worker = MonitorWorker::new(
            camera("cam_test"),
            h.deps.clone(),
            stats.clone(),
            &MonitorSettings::default(),
        );

        worker.handle_frame(plain()).await;
        assert_eq!(
            worker.handle_frame(with_block()).await,
            FrameVerdict::FalsePositive
        );
        assert!(h.repo.is_empty().await);
        assert_eq!(stats.lock().unwrap().false_positives, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_releases_the_camera() {
        let h = harness(Vec::new()).await;
        let registry = MonitorRegistry::new(
            vec![camera("cam_ingreso_1")],
            h.deps.clone(),
            MonitorSettings {
                retry_backoff: Duration::from_secs(10),
                ..Default::default()
            },
        );

        assert_eq!(
            registry.start("cam_ingreso_1").await.unwrap(),
            MonitorAction::Started
        );
        assert_eq!(
            registry.start("cam_ingreso_1").await.unwrap(),
            MonitorAction::AlreadyRunning
        );
        assert_eq!(registry.active_count().await, 1);

        assert_eq!(
            registry.stop("cam_ingreso_1").await.unwrap(),
            MonitorAction::Stopped
        );
        assert_eq!(
            registry.stop("cam_ingreso_1").await.unwrap(),
            MonitorAction::NotRunning
        );
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_camera_is_not_found() {
        let h = harness(Vec::new()).await;
        let registry = MonitorRegistry::new(vec![], h.deps, MonitorSettings::default());
        assert!(matches!(
            registry.start("nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn session_gives_up_after_bounded_retries() {
        let h = harness(Vec::new()).await;
        let registry = MonitorRegistry::new(
            vec![camera("cam_x")],
            h.deps.clone(),
            MonitorSettings {
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        registry.start("cam_x").await.unwrap();

        let mut running = true;
        for _ in 0..200 {
            if registry.active_count().await == 0 {
                running = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!running);
        let status = registry.status("cam_x").await.unwrap();
        assert!(status.stats.last_error.is_some());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn stop_reaps_the_decoder_process() {
        use std::os::unix::fs::PermissionsExt;

        let h = harness(Vec::new()).await;
        let tools = tempfile::tempdir().unwrap();
        let pid_file = tools.path().join("pid");
        let script = tools.path().join("ffmpeg");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let deps = MonitorDeps {
            extractor: Arc::new(FrameExtractor::new(FrameExtractorConfig {
                ffmpeg_path: script.to_string_lossy().into_owned(),
                ..Default::default()
            })),
            ..h.deps.clone()
        };
        let mut cam = camera("cam_file");
        cam.source_type = SourceType::Video;
        cam.camera_url = CameraUrl::Url("/data/demo/carro.mp4".to_string());
        let registry = MonitorRegistry::new(vec![cam], deps, MonitorSettings::default());
        registry.start("cam_file").await.unwrap();

        let mut pid = None;
        for _ in 0..200 {
            if let Some(p) = std::fs::read_to_string(&pid_file)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
            {
                pid = Some(p);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pid = pid.expect("decoder never started");

        assert_eq!(
            registry.stop("cam_file").await.unwrap(),
            MonitorAction::Stopped
        );
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[tokio::test]
    async fn duplicate_camera_ids_are_ignored() {
        let h = harness(Vec::new()).await;
        let registry = MonitorRegistry::new(
            vec![camera("a"), camera("a"), camera("b")],
            h.deps,
            MonitorSettings::default(),
        );
        assert_eq!(registry.cameras().len(), 2);
    }

    #[tokio::test]
    async fn default_cameras_when_no_file() {
        let cams = load_cameras(None).await.unwrap();
        assert!(cams.iter().any(|c| c.camera_id == "cam_ingreso_1"));
    }
}
