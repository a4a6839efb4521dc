//! Chunked upload handlers.
//!
//! Clients split a file into chunks, send them in any order (re-sending is
//! harmless), then finalize. Images are analysed inline; videos become a
//! processing job whose progress is streamed separately.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use vagon_core::models::{EventMetadata, Evento, JobStatus, MediaKind};
use vagon_core::{AppError, ErrorMetadata};
use vagon_storage::{ChunkStore, PutStatus, UploadStatus};
use validator::Validate;

use crate::error::{ErrorResponse, HttpAppError};
use crate::pipeline::{ImageAnalysis, ProcessingJob};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ChunkUploadResponse {
    pub file_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// `accepted` for a new chunk, `duplicate` when it replaced an earlier copy
    pub status: PutStatus,
    pub received_chunks: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VideoPendingResponse {
    /// Always `video_processing_pending`
    pub status: String,
    pub processing_id: Uuid,
    pub file_id: String,
    pub status_url: String,
    pub stream_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum FinalizeResponse {
    Image(ImageAnalysis),
    Video(VideoPendingResponse),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AbortUploadResponse {
    pub file_id: String,
    /// Whether the upload still had state to release
    pub aborted: bool,
    pub cancelled_jobs: usize,
}

pub(crate) fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::InvalidInput(format!("Failed to read multipart: {}", e))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse::<T>().map_err(|_| {
        AppError::InvalidInput(format!("Invalid value for {}: '{}'", name, value))
    })
}

fn required<T>(name: &str, value: Option<T>) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::InvalidInput(format!("Missing field {}", name)))
}

/// Empty form fields count as absent.
pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

struct ChunkForm {
    file_id: String,
    chunk_index: u32,
    total_chunks: u32,
    data: Bytes,
}

impl ChunkForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut file_id = None;
        let mut chunk_index = None;
        let mut total_chunks = None;
        let mut data = None;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().map(|s| s.to_string()).unwrap_or_default();
            match name.as_str() {
                "chunk" | "file" => {
                    if data.is_some() {
                        return Err(AppError::InvalidInput(
                            "Send exactly one chunk per request".to_string(),
                        ));
                    }
                    data = Some(field.bytes().await.map_err(multipart_error)?);
                }
                "fileId" => file_id = Some(field.text().await.map_err(multipart_error)?),
                "chunkIndex" => {
                    let v = field.text().await.map_err(multipart_error)?;
                    chunk_index = Some(parse_field("chunkIndex", &v)?);
                }
                "totalChunks" => {
                    let v = field.text().await.map_err(multipart_error)?;
                    total_chunks = Some(parse_field("totalChunks", &v)?);
                }
                // originalFilename is only needed at finalize
                _ => {}
            }
        }

        Ok(Self {
            file_id: required("fileId", file_id)?.trim().to_string(),
            chunk_index: required("chunkIndex", chunk_index)?,
            total_chunks: required("totalChunks", total_chunks)?,
            data: required("chunk", data)?,
        })
    }
}

/// Event metadata fields shared by every upload form.
#[derive(Default)]
pub(crate) struct MetadataFields {
    evento: Option<Evento>,
    tunel: Option<String>,
    modelo_ladrillo: Option<String>,
    merma: Option<f64>,
}

impl MetadataFields {
    /// Take the field if it is a metadata field. Returns whether it was.
    pub(crate) fn accept(&mut self, name: &str, value: String) -> Result<bool, AppError> {
        match name {
            "evento" => {
                self.evento = non_empty(value)
                    .map(|v| {
                        serde_json::from_value::<Evento>(serde_json::Value::String(
                            v.to_lowercase(),
                        ))
                        .map_err(|_| {
                            AppError::InvalidInput(format!(
                                "evento must be 'ingreso' or 'egreso', got '{}'",
                                v
                            ))
                        })
                    })
                    .transpose()?
            }
            "tunel" => self.tunel = non_empty(value),
            "modelo_ladrillo" | "modeloLadrillo" => self.modelo_ladrillo = non_empty(value),
            "merma" => {
                self.merma = non_empty(value)
                    .map(|v| parse_field::<f64>("merma", &v))
                    .transpose()?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub(crate) fn finish(self) -> Result<EventMetadata, AppError> {
        let metadata = EventMetadata {
            evento: required("evento", self.evento)?,
            tunel: self.tunel,
            modelo_ladrillo: self.modelo_ladrillo,
            merma: self.merma,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

struct FinalizeForm {
    file_id: String,
    original_filename: String,
    total_chunks: u32,
    file_size: Option<u64>,
    metadata: EventMetadata,
}

impl FinalizeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut file_id = None;
        let mut original_filename = None;
        let mut total_chunks = None;
        let mut file_size = None;
        let mut metadata = MetadataFields::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().map(|s| s.to_string()).unwrap_or_default();
            let value = field.text().await.map_err(multipart_error)?;
            match name.as_str() {
                "fileId" => file_id = non_empty(value),
                "originalFilename" => original_filename = non_empty(value),
                "totalChunks" => total_chunks = Some(parse_field::<u32>("totalChunks", &value)?),
                "fileSize" => {
                    file_size = non_empty(value)
                        .map(|v| parse_field::<u64>("fileSize", &v))
                        .transpose()?
                }
                other => {
                    metadata.accept(other, value)?;
                }
            }
        }

        let metadata = metadata.finish()?;
        Ok(Self {
            file_id: required("fileId", file_id)?,
            original_filename: required("originalFilename", original_filename)?,
            total_chunks: required("totalChunks", total_chunks)?,
            file_size,
            metadata,
        })
    }
}

/// Store one chunk of an upload
#[utoipa::path(
    post,
    path = "/upload-chunk/",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "chunk, fileId, chunkIndex, totalChunks, originalFilename"),
    responses(
        (status = 200, description = "Chunk stored", body = ChunkUploadResponse),
        (status = 400, description = "Invalid chunk", body = ErrorResponse),
        (status = 410, description = "Upload aborted", body = ErrorResponse),
        (status = 413, description = "Chunk too large", body = ErrorResponse)
    )
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, HttpAppError> {
    let form = ChunkForm::read(multipart).await?;
    let store = &state.uploads.chunk_store;

    let status = store
        .put_chunk(&form.file_id, form.chunk_index, form.total_chunks, form.data)
        .await?;
    let received_chunks = store
        .status(&form.file_id)
        .await
        .map(|s| s.received_chunks.len())
        .unwrap_or(0);

    Ok(Json(ChunkUploadResponse {
        file_id: form.file_id,
        chunk_index: form.chunk_index,
        total_chunks: form.total_chunks,
        status,
        received_chunks,
    }))
}

/// Assemble an upload and analyse it
///
/// Images are answered inline. Videos are queued and answered with a
/// processing id; follow progress on `/stream-video-processing/{id}` or poll
/// `/processing-status/{id}`.
#[utoipa::path(
    post,
    path = "/finalize-upload/",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "fileId, originalFilename, totalChunks, fileSize, evento, tunel, modelo_ladrillo, merma"),
    responses(
        (status = 200, description = "Image result or pending video job", body = FinalizeResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Chunks missing", body = ErrorResponse),
        (status = 422, description = "Size mismatch or undecodable media", body = ErrorResponse),
        (status = 500, description = "Detection accepted but not persisted", body = ImageAnalysis),
        (status = 503, description = "Processing queue full", body = ErrorResponse)
    )
)]
pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FinalizeResponse>), HttpAppError> {
    let form = FinalizeForm::read(multipart).await?;
    ChunkStore::validate_file_id(&form.file_id)?;

    let kind = MediaKind::from_filename(&form.original_filename).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Unsupported file type: {}",
            form.original_filename
        ))
    })?;

    // Refuse before consuming the fragments so the client can retry later
    if kind == MediaKind::Video && !state.processing.queue.has_capacity() {
        return Err(AppError::QueueFull(
            "Processing queue is full, please try again later".to_string(),
        )
        .into());
    }

    let file = state
        .uploads
        .chunk_store
        .try_assemble(
            &form.file_id,
            &form.original_filename,
            form.total_chunks,
            form.file_size,
        )
        .await?;

    tracing::info!(
        file_id = %file.file_id,
        size_bytes = file.size_bytes,
        kind = ?kind,
        evento = %form.metadata.evento,
        "Upload finalized"
    );

    match kind {
        MediaKind::Image => {
            let analysis = state
                .processing
                .pipeline
                .analyze_image(&file, &form.metadata)
                .await?;
            let status = if analysis.status == crate::pipeline::ImageStatus::DbError {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            Ok((status, Json(FinalizeResponse::Image(analysis))))
        }
        MediaKind::Video => {
            let processing_id = Uuid::new_v4();
            let hub = &state.processing.hub;
            let cancel = hub.register(processing_id, &file.file_id);
            let job = ProcessingJob {
                processing_id,
                file_id: file.file_id.clone(),
                storage_key: file.storage_key.clone(),
                metadata: form.metadata,
                settings: state.detection.settings(),
                cancel,
            };
            if let Err(e) = state.processing.queue.submit(job) {
                hub.finish(processing_id, JobStatus::Failed, Some(e.client_message()));
                return Err(e.into());
            }

            Ok((
                StatusCode::OK,
                Json(FinalizeResponse::Video(VideoPendingResponse {
                    status: "video_processing_pending".to_string(),
                    processing_id,
                    file_id: file.file_id,
                    status_url: format!("/processing-status/{}", processing_id),
                    stream_url: format!("/stream-video-processing/{}", processing_id),
                })),
            ))
        }
    }
}

/// Report which chunks of an upload have arrived
#[utoipa::path(
    get,
    path = "/upload-status/{file_id}",
    tag = "uploads",
    params(("file_id" = String, Path, description = "Upload id")),
    responses(
        (status = 200, description = "Upload status", body = UploadStatus),
        (status = 404, description = "Unknown upload", body = ErrorResponse)
    )
)]
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<UploadStatus>, HttpAppError> {
    let status = state.uploads.chunk_store.status(&file_id).await?;
    Ok(Json(status))
}

/// Abort an upload and cancel any job created from it
#[utoipa::path(
    post,
    path = "/abort-upload/{file_id}",
    tag = "uploads",
    params(("file_id" = String, Path, description = "Upload id")),
    responses(
        (status = 200, description = "Upload aborted", body = AbortUploadResponse),
        (status = 400, description = "Invalid upload id", body = ErrorResponse)
    )
)]
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<AbortUploadResponse>, HttpAppError> {
    let aborted = state.uploads.chunk_store.abort(&file_id).await?;
    let cancelled_jobs = state.processing.hub.cancel_by_file(&file_id);

    tracing::info!(file_id = %file_id, aborted, cancelled_jobs, "Abort request handled");

    Ok(Json(AbortUploadResponse {
        file_id,
        aborted,
        cancelled_jobs,
    }))
}
