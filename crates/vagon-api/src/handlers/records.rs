//! Read side of the detection history.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    Json,
};
use vagon_core::models::{HistorialQuery, SearchQuery, TrajectoryStats, VagonetaRecord};
use vagon_core::AppError;

use crate::error::{ErrorResponse, HttpAppError, ValidatedQuery};
use crate::state::RecordState;

const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");

fn no_trajectory(numero: &str) -> AppError {
    AppError::NotFound(format!("No records for vagoneta {}", numero))
}

/// List records, newest first
///
/// Served on both `/vagonetas/` and `/historial/`. The number of matches
/// before paging is returned in `X-Total-Count`.
#[utoipa::path(
    get,
    path = "/historial/",
    tag = "records",
    params(HistorialQuery),
    responses(
        (status = 200, description = "Matching records", body = Vec<VagonetaRecord>),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
pub async fn list_records(
    State(records): State<RecordState>,
    ValidatedQuery(query): ValidatedQuery<HistorialQuery>,
) -> Result<(HeaderMap, Json<Vec<VagonetaRecord>>), HttpAppError> {
    let (items, total) = tokio::try_join!(
        records.repository.list(&query),
        records.repository.count(&query)
    )?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&total.to_string()) {
        headers.insert(TOTAL_COUNT_HEADER, value);
    }
    Ok((headers, Json(items)))
}

/// Free-text search over numero, tunel and modelo_ladrillo
#[utoipa::path(
    get,
    path = "/search",
    tag = "records",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching records", body = Vec<VagonetaRecord>),
        (status = 400, description = "Query too short", body = ErrorResponse)
    )
)]
pub async fn search_records(
    State(records): State<RecordState>,
    ValidatedQuery(query): ValidatedQuery<SearchQuery>,
) -> Result<Json<Vec<VagonetaRecord>>, HttpAppError> {
    Ok(Json(records.repository.search(&query).await?))
}

/// Every record of one vagoneta, oldest first
#[utoipa::path(
    get,
    path = "/trayectoria/{numero}",
    tag = "records",
    params(("numero" = String, Path, description = "Vagoneta number")),
    responses(
        (status = 200, description = "Trajectory", body = Vec<VagonetaRecord>),
        (status = 404, description = "No records for this number", body = ErrorResponse)
    )
)]
pub async fn trajectory(
    State(records): State<RecordState>,
    Path(numero): Path<String>,
) -> Result<Json<Vec<VagonetaRecord>>, HttpAppError> {
    let trajectory = records.repository.trajectory(&numero).await?;
    if trajectory.is_empty() {
        return Err(no_trajectory(&numero).into());
    }
    Ok(Json(trajectory))
}

#[utoipa::path(
    get,
    path = "/trayectoria/{numero}/estadisticas",
    tag = "records",
    params(("numero" = String, Path, description = "Vagoneta number")),
    responses(
        (status = 200, description = "Trajectory statistics", body = TrajectoryStats),
        (status = 404, description = "No records for this number", body = ErrorResponse)
    )
)]
pub async fn trajectory_stats(
    State(records): State<RecordState>,
    Path(numero): Path<String>,
) -> Result<Json<TrajectoryStats>, HttpAppError> {
    let trajectory = records.repository.trajectory(&numero).await?;
    let stats =
        TrajectoryStats::from_trajectory(&numero, &trajectory).ok_or_else(|| no_trajectory(&numero))?;
    Ok(Json(stats))
}
