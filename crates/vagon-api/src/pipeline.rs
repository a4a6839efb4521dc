//! Upload analysis: inline for images, as a streamed job for videos.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;
use vagon_core::models::{
    DetectorSettings, EventMetadata, JobStatus, MediaKind, OrigenDeteccion, Outcome,
    VagonetaRecord,
};
use vagon_core::{AppError, ErrorMetadata};
use vagon_processing::{encode_jpeg, FrameExtractor};
use vagon_storage::{keys, AssembledFile, Storage};

use crate::detection::DetectionContext;
use crate::progress::{BestComposite, JobEventKind, ProgressHub};
use crate::recorder::{AcceptedDetection, EventRecorder};

const FRAME_JPEG_QUALITY: u8 = 90;

/// A video queued for analysis.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub processing_id: Uuid,
    pub file_id: String,
    pub storage_key: String,
    pub metadata: EventMetadata,
    /// Taken when the job was created
    pub settings: DetectorSettings,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Accepted,
    Ignored,
    /// Detection failed; nothing was recorded
    Error,
    /// A number was accepted but could not be persisted
    DbError,
}

/// Inline result of an image upload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImageAnalysis {
    pub status: ImageStatus,
    pub file_id: String,
    pub numero: Option<String>,
    pub confianza: Option<f32>,
    pub message: String,
    pub media_reference: String,
    /// Candidates left after quality filtering
    pub candidates: usize,
    pub record: Option<VagonetaRecord>,
}

#[derive(Clone)]
pub struct Pipeline {
    detection: DetectionContext,
    extractor: Arc<FrameExtractor>,
    storage: Arc<dyn Storage>,
    recorder: EventRecorder,
    hub: Arc<ProgressHub>,
}

impl Pipeline {
    pub fn new(
        detection: DetectionContext,
        extractor: Arc<FrameExtractor>,
        storage: Arc<dyn Storage>,
        recorder: EventRecorder,
        hub: Arc<ProgressHub>,
    ) -> Self {
        Self {
            detection,
            extractor,
            storage,
            recorder,
            hub,
        }
    }

    fn local_path(&self, storage_key: &str) -> Result<PathBuf, AppError> {
        self.storage.local_path(storage_key)?.ok_or_else(|| {
            AppError::Internal("Storage backend does not expose local files".to_string())
        })
    }

    /// Analyze a single image and record an accepted number.
    ///
    /// Undecodable input is an error; a failed detection or a failed write is
    /// reported in the result so the client still sees what happened.
    #[tracing::instrument(skip(self, file, metadata), fields(file_id = %file.file_id))]
    pub async fn analyze_image(
        &self,
        file: &AssembledFile,
        metadata: &EventMetadata,
    ) -> Result<ImageAnalysis, AppError> {
        let settings = self.detection.settings();
        let path = self.local_path(&file.storage_key)?;

        let mut frames = self.extractor.extract(&path, MediaKind::Image).await?;
        let frame = frames
            .next_frame()
            .await?
            .ok_or_else(|| AppError::Decode("Image contains no frame".to_string()))?;

        let mut analysis = ImageAnalysis {
            status: ImageStatus::Ignored,
            file_id: file.file_id.clone(),
            numero: None,
            confianza: None,
            message: String::new(),
            media_reference: file.storage_key.clone(),
            candidates: 0,
            record: None,
        };

        let events = match self.detection.detector().detect(&frame, &settings).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Detection failed for image upload");
                analysis.status = ImageStatus::Error;
                analysis.message = Outcome::Error {
                    reason: format!("Error en la detección: {}", e),
                }
                .message();
                return Ok(analysis);
            }
        };
        analysis.candidates = events.len();

        let outcome = self.detection.aggregator().aggregate(&events, &settings);
        analysis.message = outcome.message();

        let Outcome::Accepted { numero, confianza } = outcome else {
            return Ok(analysis);
        };
        analysis.numero = Some(numero.clone());
        analysis.confianza = Some(confianza);

        let accepted = AcceptedDetection {
            numero,
            confianza,
            origen: OrigenDeteccion::Manual,
            media_reference: file.storage_key.clone(),
        };
        match self.recorder.record(accepted, metadata).await {
            Ok(record) => {
                analysis.status = ImageStatus::Accepted;
                analysis.record = Some(record);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist image detection");
                analysis.status = ImageStatus::DbError;
                analysis.message = format!(
                    "{}, pero no se pudo guardar el registro: {}",
                    analysis.message,
                    e.client_message()
                );
            }
        }
        Ok(analysis)
    }

    /// Store an image received in a single request and analyze it.
    pub async fn analyze_uploaded_image(
        &self,
        filename: &str,
        data: Bytes,
        metadata: &EventMetadata,
    ) -> Result<ImageAnalysis, AppError> {
        if MediaKind::from_filename(filename) != Some(MediaKind::Image) {
            return Err(AppError::InvalidInput(format!(
                "'{}' is not a supported image",
                filename
            )));
        }
        if data.is_empty() {
            return Err(AppError::InvalidInput(format!("'{}' is empty", filename)));
        }
        let size_bytes = data.len() as u64;
        let storage_key = keys::upload_key(filename);
        self.storage
            .upload_with_key(&storage_key, data, MediaKind::content_type_for(filename))
            .await?;

        let file = AssembledFile {
            file_id: Uuid::new_v4().to_string(),
            storage_key,
            original_filename: filename.to_string(),
            size_bytes,
        };
        self.analyze_image(&file, metadata).await
    }

    /// Fail a job. Once frames were analysed their `detection_update` events
    /// are already out, so the error carries `partial` and says that nothing
    /// was recorded from them.
    fn fail(&self, processing_id: Uuid, err: &AppError, frames_processed: u64) {
        let partial = frames_processed > 0;
        let mut message = err.client_message();
        if partial {
            message = format!(
                "{} (stopped after {} frames; earlier detections were discarded and nothing was recorded)",
                message, frames_processed
            );
        }
        tracing::error!(
            processing_id = %processing_id,
            error = %err,
            code = err.error_code(),
            frames_processed,
            "Video processing failed"
        );
        self.hub.publish(
            processing_id,
            JobEventKind::Error,
            json!({
                "code": err.error_code(),
                "message": message,
                "frames_processed": frames_processed,
                "partial": partial,
            }),
        );
        self.hub.finish(processing_id, JobStatus::Failed, Some(message));
    }

    /// Persist the frame that produced the accepted number. Falls back to the
    /// upload itself when the frame cannot be stored.
    async fn store_best_frame(&self, job: &ProcessingJob, image: Option<RgbImage>) -> String {
        let Some(image) = image else {
            return job.storage_key.clone();
        };
        let key = keys::frame_key(job.processing_id);
        let encoded =
            tokio::task::spawn_blocking(move || encode_jpeg(&image, FRAME_JPEG_QUALITY)).await;
        let bytes = match encoded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to encode best frame, referencing upload");
                return job.storage_key.clone();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Frame encode task failed, referencing upload");
                return job.storage_key.clone();
            }
        };
        match self
            .storage
            .upload_with_key(&key, Bytes::from(bytes), "image/jpeg")
            .await
        {
            Ok(_) => key,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Failed to store best frame, referencing upload");
                job.storage_key.clone()
            }
        }
    }

    /// Run a video job to a terminal state.
    ///
    /// At most one record is written per job: the single best accepted
    /// composite across all sampled frames. Cancellation is honoured until
    /// the result starts being persisted.
    #[tracing::instrument(skip(self, job), fields(
        processing_id = %job.processing_id,
        file_id = %job.file_id,
        job.status = tracing::field::Empty
    ))]
    pub async fn run_video(&self, job: ProcessingJob) {
        let start = Instant::now();
        let processing_id = job.processing_id;
        let cancel = job.cancel.clone();

        if !self.hub.update(processing_id, |s| s.status = JobStatus::Running) {
            tracing::info!("Job finished before it started");
            return;
        }
        tracing::info!(mode = %job.settings.modo_deteccion, "Video processing started");

        let path = match self.local_path(&job.storage_key) {
            Ok(path) => path,
            Err(e) => return self.fail(processing_id, &e, 0),
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = self.extractor.extract(&path, MediaKind::Video) => opened,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(e) => return self.fail(processing_id, &AppError::from(e), 0),
        };

        let total_frames = frames.total_hint();
        self.hub.update(processing_id, |s| s.total_frames = total_frames);

        let detector = self.detection.detector();
        let mut aggregator = self.detection.aggregator().video(job.settings);
        let mut best_image: Option<RgbImage> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(frames_seen = aggregator.frames_seen(), "Video processing cancelled");
                    tracing::Span::current().record("job.status", "cancelled");
                    return;
                }
                next = frames.next_frame() => next,
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    return self.fail(
                        processing_id,
                        &AppError::from(e),
                        aggregator.frames_seen(),
                    )
                }
            };

            let detected = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::Span::current().record("job.status", "cancelled");
                    return;
                }
                detected = detector.detect(&frame, &job.settings) => detected,
            };

            match detected {
                Ok(events) => {
                    let (candidate, improved) = aggregator.push_frame(&events);
                    if improved {
                        best_image = Some(frame.image.clone());
                    }
                    if let Some(candidate) = candidate {
                        self.hub.publish(
                            processing_id,
                            JobEventKind::DetectionUpdate,
                            json!({
                                "frame_index": frame.index,
                                "position_secs": frame.position_secs,
                                "numero": candidate.numero,
                                "confianza": candidate.confianza,
                                "fragments": candidate.fragments,
                                "is_best": improved,
                            }),
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(frame_index = frame.index, error = %e, "Frame skipped after detection error");
                    aggregator.push_failed_frame();
                }
            }

            let frame_cursor = aggregator.frames_seen();
            let detections = aggregator.frames_with_detections();
            let frames_failed = aggregator.frames_failed();
            let best = aggregator.best().map(|c| BestComposite {
                numero: c.numero.clone(),
                confianza: c.confianza,
                frame_index: c.frame_index,
            });
            let progress_percent = total_frames
                .filter(|t| *t > 0)
                .map(|t| ((frame_cursor as f64 / t as f64) * 100.0).min(100.0));

            self.hub.update(processing_id, |s| {
                s.frame_cursor = frame_cursor;
                s.detections = detections;
                s.frames_failed = frames_failed;
                s.best = best;
            });
            self.hub.publish(
                processing_id,
                JobEventKind::Progress,
                json!({
                    "frame_cursor": frame_cursor,
                    "total_frames": total_frames,
                    "detections": detections,
                    "frames_failed": frames_failed,
                    "progress_percent": progress_percent,
                }),
            );
        }

        let frames_seen = aggregator.frames_seen();
        let outcome = if frames_seen > 0 && aggregator.frames_failed() == frames_seen {
            Outcome::Error {
                reason: "La detección falló en todos los cuadros del video".to_string(),
            }
        } else {
            aggregator.finish()
        };

        let message = outcome.message();
        self.hub.update(processing_id, |s| {
            s.outcome = Some(outcome.clone());
            s.message = Some(message.clone());
        });
        self.hub.publish(
            processing_id,
            JobEventKind::FinalResult,
            json!({
                "outcome": outcome,
                "message": message,
                "frames_processed": frames_seen,
                "frames_with_detections": aggregator.frames_with_detections(),
                "frames_failed": aggregator.frames_failed(),
            }),
        );

        match outcome {
            Outcome::Accepted { numero, confianza } => {
                if !self.hub.begin_commit(processing_id) {
                    tracing::info!("Job cancelled before its result was persisted");
                    return;
                }
                let media_reference = self.store_best_frame(&job, best_image).await;
                let accepted = AcceptedDetection {
                    numero: numero.clone(),
                    confianza,
                    origen: OrigenDeteccion::Manual,
                    media_reference,
                };
                match self.recorder.record(accepted, &job.metadata).await {
                    Ok(record) => {
                        self.hub.update(processing_id, |s| s.record_id = Some(record.id));
                        self.hub.publish(
                            processing_id,
                            JobEventKind::DbRecordCreated,
                            json!({ "record": record }),
                        );
                        self.hub
                            .finish(processing_id, JobStatus::Completed, Some(message));
                        tracing::Span::current().record("job.status", "success");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, numero = %numero, "Failed to persist video detection");
                        let db_message = format!(
                            "{}, pero no se pudo guardar el registro: {}",
                            message,
                            e.client_message()
                        );
                        self.hub.publish(
                            processing_id,
                            JobEventKind::DbError,
                            json!({
                                "numero": numero,
                                "confianza": confianza,
                                "message": db_message,
                            }),
                        );
                        self.hub
                            .finish(processing_id, JobStatus::Failed, Some(db_message));
                        tracing::Span::current().record("job.status", "db_error");
                    }
                }
            }
            Outcome::Ignored { reason } => {
                self.hub.publish(
                    processing_id,
                    JobEventKind::NoDetectionFinal,
                    json!({ "reason": reason, "message": message }),
                );
                self.hub
                    .finish(processing_id, JobStatus::Completed, Some(message));
                tracing::Span::current().record("job.status", "ignored");
            }
            Outcome::Error { reason } => {
                self.fail(processing_id, &AppError::Detection(reason), 0);
                tracing::Span::current().record("job.status", "failed");
            }
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            frames_seen,
            "Video processing finished"
        );
    }
}
