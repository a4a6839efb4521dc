//! Single-request image uploads.
//!
//! For small images that fit in one request body; anything larger goes
//! through the chunked upload. Videos are not accepted here.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;
use vagon_core::models::EventMetadata;
use vagon_core::{AppError, ErrorMetadata};

use crate::error::{ErrorResponse, HttpAppError};
use crate::handlers::uploads::{multipart_error, MetadataFields};
use crate::pipeline::{ImageAnalysis, ImageStatus};
use crate::state::AppState;

/// One file of a batch upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchUploadItem {
    pub filename: String,
    /// `ok` when the file was analysed, `error` otherwise
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ImageAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchUploadResponse {
    /// In the order the files were sent
    pub results: Vec<BatchUploadItem>,
}

struct ImageForm {
    files: Vec<(String, Bytes)>,
    metadata: EventMetadata,
}

impl ImageForm {
    async fn read(mut multipart: Multipart, file_fields: &[&str]) -> Result<Self, AppError> {
        let mut files = Vec::new();
        let mut metadata = MetadataFields::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().map(|s| s.to_string()).unwrap_or_default();
            if file_fields.contains(&name.as_str()) {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let data = field.bytes().await.map_err(multipart_error)?;
                files.push((filename, data));
                continue;
            }
            let value = field.text().await.map_err(multipart_error)?;
            metadata.accept(&name, value)?;
        }

        Ok(Self {
            files,
            metadata: metadata.finish()?,
        })
    }
}

/// Upload one image and analyse it in the same request
#[utoipa::path(
    post,
    path = "/upload/",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "file, evento, tunel, modelo_ladrillo, merma"),
    responses(
        (status = 200, description = "Analysis result", body = ImageAnalysis),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 413, description = "Image too large, use the chunked upload", body = ErrorResponse),
        (status = 422, description = "Undecodable image", body = ErrorResponse),
        (status = 500, description = "Detection accepted but not persisted", body = ImageAnalysis)
    )
)]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ImageAnalysis>), HttpAppError> {
    let mut form = ImageForm::read(multipart, &["file"]).await?;
    if form.files.len() != 1 {
        return Err(AppError::InvalidInput("Send exactly one file".to_string()).into());
    }
    let (filename, data) = form.files.remove(0);

    let analysis = state
        .processing
        .pipeline
        .analyze_uploaded_image(&filename, data, &form.metadata)
        .await?;
    tracing::info!(
        filename = %filename,
        status = ?analysis.status,
        numero = ?analysis.numero,
        "Direct image upload analysed"
    );

    let status = if analysis.status == ImageStatus::DbError {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(analysis)))
}

/// Upload several images and analyse each one
///
/// A file that cannot be analysed is reported in its own entry and does not
/// stop the rest of the batch.
#[utoipa::path(
    post,
    path = "/upload-multiple/",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "files (repeated), evento, tunel, modelo_ladrillo, merma"),
    responses(
        (status = 200, description = "One entry per file", body = BatchUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 413, description = "Batch too large", body = ErrorResponse)
    )
)]
pub async fn upload_multiple(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, HttpAppError> {
    let form = ImageForm::read(multipart, &["files", "file"]).await?;
    if form.files.is_empty() {
        return Err(AppError::InvalidInput("Send at least one file".to_string()).into());
    }

    let mut results = Vec::with_capacity(form.files.len());
    for (filename, data) in form.files {
        let analyzed = state
            .processing
            .pipeline
            .analyze_uploaded_image(&filename, data, &form.metadata)
            .await;
        let item = match analyzed {
            Ok(analysis) => BatchUploadItem {
                filename,
                status: "ok".to_string(),
                result: Some(analysis),
                error: None,
            },
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "Batch file rejected");
                BatchUploadItem {
                    filename,
                    status: "error".to_string(),
                    result: None,
                    error: Some(e.client_message()),
                }
            }
        };
        results.push(item);
    }

    Ok(Json(BatchUploadResponse { results }))
}
