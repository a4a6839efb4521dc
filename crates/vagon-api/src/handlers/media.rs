//! Stored media download.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use vagon_core::models::MediaKind;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::UploadState;

/// Stream a stored object such as an upload or a detection frame
#[utoipa::path(
    get,
    path = "/media/{key}",
    tag = "media",
    params(("key" = String, Path, description = "Storage key, e.g. frames/<id>.jpg")),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 400, description = "Key outside the storage root", body = ErrorResponse),
        (status = 404, description = "No such object", body = ErrorResponse)
    )
)]
pub async fn get_media(
    State(uploads): State<UploadState>,
    Path(key): Path<String>,
) -> Result<Response, HttpAppError> {
    let length = uploads.storage.content_length(&key).await?;
    let stream = uploads.storage.download_stream(&key).await?;

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(MediaKind::content_type_for(&key)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );
    Ok(response)
}
