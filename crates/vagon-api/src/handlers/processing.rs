//! Video job status, cancellation and the SSE progress stream.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use vagon_core::models::JobStatus;
use vagon_core::AppError;

use crate::error::{ErrorResponse, HttpAppError};
use crate::progress::{CancelResult, JobSnapshot, JobSubscription};
use crate::state::ProcessingState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub processing_id: Uuid,
    pub cancelled: bool,
    pub status: JobStatus,
    pub message: String,
}

fn job_not_found(processing_id: Uuid) -> AppError {
    AppError::NotFound(format!("Processing job {} not found", processing_id))
}

/// Poll the state of a video job
#[utoipa::path(
    get,
    path = "/processing-status/{processing_id}",
    tag = "processing",
    params(("processing_id" = Uuid, Path, description = "Processing job id")),
    responses(
        (status = 200, description = "Job snapshot", body = JobSnapshot),
        (status = 404, description = "Unknown or evicted job", body = ErrorResponse)
    )
)]
pub async fn processing_status(
    State(processing): State<ProcessingState>,
    Path(processing_id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, HttpAppError> {
    let snapshot = processing
        .hub
        .snapshot(processing_id)
        .ok_or_else(|| job_not_found(processing_id))?;
    Ok(Json(snapshot))
}

/// Cancel a video job
///
/// Cancelling twice, or after the job finished, reports the current state
/// without changing it.
#[utoipa::path(
    post,
    path = "/cancel-processing/{processing_id}",
    tag = "processing",
    params(("processing_id" = Uuid, Path, description = "Processing job id")),
    responses(
        (status = 200, description = "Cancellation result", body = CancelResponse),
        (status = 404, description = "Unknown or evicted job", body = ErrorResponse)
    )
)]
pub async fn cancel_processing(
    State(processing): State<ProcessingState>,
    Path(processing_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, HttpAppError> {
    let (cancelled, status, message) = match processing.hub.cancel(processing_id) {
        CancelResult::Cancelled => (true, JobStatus::Cancelled, "Processing cancelled".to_string()),
        CancelResult::AlreadyFinished(status) => (
            false,
            status,
            format!("Processing already finished with status {}", status),
        ),
        CancelResult::TooLate => (
            false,
            JobStatus::Running,
            "Result is being saved and can no longer be cancelled".to_string(),
        ),
        CancelResult::NotFound => return Err(job_not_found(processing_id).into()),
    };

    tracing::info!(processing_id = %processing_id, cancelled, status = %status, "Cancel requested");

    Ok(Json(CancelResponse {
        processing_id,
        cancelled,
        status,
        message,
    }))
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn event_stream(subscription: JobSubscription) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next().await?;
        let sse = Event::default()
            .event(event.kind.as_str())
            .id(event.seq.to_string())
            .json_data(&event);
        Some((sse, subscription))
    })
}

/// Server-sent progress events for a video job
///
/// Events arrive in order and the stream closes after `stream_end`. A client
/// that connects late receives the earlier events first; `Last-Event-ID`
/// resumes after the named event.
#[utoipa::path(
    get,
    path = "/stream-video-processing/{processing_id}",
    tag = "processing",
    params(("processing_id" = Uuid, Path, description = "Processing job id")),
    responses(
        (status = 200, description = "text/event-stream of job events", content_type = "text/event-stream"),
        (status = 404, description = "Unknown or evicted job", body = ErrorResponse)
    )
)]
pub async fn stream_processing(
    State(processing): State<ProcessingState>,
    Path(processing_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpAppError> {
    let mut subscription = processing
        .hub
        .subscribe(processing_id)
        .ok_or_else(|| job_not_found(processing_id))?;
    if let Some(seq) = last_event_id(&headers) {
        subscription = subscription.resume_after(seq);
    }

    tracing::debug!(processing_id = %processing_id, "SSE client connected");

    Ok(Sse::new(event_stream(subscription))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
