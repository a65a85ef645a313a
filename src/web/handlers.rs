//! HTTP request handlers.

use super::AppState;
use crate::ingest::IngestError;
use crate::scheduler::{ActionOutcome, RunSummary};
use crate::service::*;
use crate::store::StoreError;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::de::DeserializeOwned;
use serde_json::json;

type ApiResult<T> = Result<Json<Success<T>>, ServiceError>;

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Disabled(_) => StatusCode::CONFLICT,
            ServiceError::Storage(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ServiceError::Storage(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ServiceError::Ingest(IngestError::InvalidResult) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

/// Decode a JSON body into a payload. An empty body is the default payload.
fn decode<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::Validation(format!("Invalid request body: {}", e)))
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// API: Schedules
// ============================================================================

pub async fn handle_get_schedules(State(state): State<AppState>) -> ApiResult<SchedulesResponse> {
    Ok(Json(Success::new(state.service.get_schedules().await?)))
}

pub async fn handle_save_schedule(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<ScheduleResponse> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.save_schedule(payload).await?)))
}

pub async fn handle_delete_schedule(State(state): State<AppState>, body: Bytes) -> ApiResult<Empty> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.delete_schedule(payload).await?)))
}

pub async fn handle_delete_schedule_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Empty> {
    let payload = DeleteSchedulePayload {
        schedule_id: Some(id),
    };
    Ok(Json(Success::new(state.service.delete_schedule(payload).await?)))
}

// ============================================================================
// API: Runs
// ============================================================================

pub async fn handle_run_scheduled(State(state): State<AppState>, body: Bytes) -> ApiResult<RunSummary> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(
        state.service.run_scheduled_traceroutes(payload).await?,
    )))
}

pub async fn handle_run_action(State(state): State<AppState>, body: Bytes) -> ApiResult<ActionOutcome> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.run_action(payload).await?)))
}

pub async fn handle_traceroute(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<TracerouteResponse> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.run_traceroute(payload).await?)))
}

// ============================================================================
// API: Geolocation and log ingest
// ============================================================================

pub async fn handle_geolocate(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<GeolocateResponse> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.geolocate(payload).await?)))
}

pub async fn handle_ingest_logs(State(state): State<AppState>, body: Bytes) -> ApiResult<IngestResponse> {
    let payload = decode(&body)?;
    Ok(Json(Success::new(state.service.ingest_logs(payload).await?)))
}
