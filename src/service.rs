//! Application entry points.
//!
//! Every operation takes a typed, camelCase payload and returns a typed
//! response; failures are [`ServiceError`]s which the web layer turns into
//! `{success: false, error}` bodies.

use crate::ingest::{decode_result, format_records, IngestError, RecordContext};
use crate::scheduler::{ActionOutcome, Orchestrator, RunError, RunSummary, SelectError, Selection};
use crate::store::{Schedule, StoreError};
use crate::trace::{is_private_ip, GeoLocation, TraceError, TracerouteResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Service error types.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Disabled(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

impl From<RunError> for ServiceError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Select(e @ SelectError::NotFound(_)) => ServiceError::NotFound(e.to_string()),
            RunError::Select(e @ SelectError::Disabled(_)) => ServiceError::Disabled(e.to_string()),
            RunError::Store(e) => ServiceError::Storage(e),
            RunError::Trace(e) => ServiceError::Trace(e),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SaveSchedulePayload {
    #[serde(default)]
    pub schedule: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSchedulePayload {
    #[serde(default)]
    pub schedule_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScheduledPayload {
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub force_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestLogsPayload {
    #[serde(default)]
    pub traceroute_result: Option<Value>,
    #[serde(default)]
    pub schedule_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TraceroutePayload {
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeolocatePayload {
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunActionPayload {
    #[serde(default)]
    pub schedule_id: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// Wraps a response body as `{success: true, ...}`.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Success<T> {
    pub fn new(body: T) -> Self {
        Self {
            success: true,
            body,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SchedulesResponse {
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub schedule: Schedule,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub records_ingested: usize,
}

#[derive(Debug, Serialize)]
pub struct TracerouteResponse {
    pub result: TracerouteResult,
}

#[derive(Debug, Serialize)]
pub struct GeolocateResponse {
    pub data: GeoLocation,
}

// ============================================================================
// Service
// ============================================================================

/// The traceroute application, as seen by its callers.
#[derive(Clone)]
pub struct TracerouteService {
    orchestrator: Arc<Orchestrator>,
}

impl TracerouteService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn get_schedules(&self) -> Result<SchedulesResponse, ServiceError> {
        let schedules = self.orchestrator.schedules().load().await?;
        Ok(SchedulesResponse { schedules })
    }

    /// Insert or replace a schedule.
    pub async fn save_schedule(
        &self,
        payload: SaveSchedulePayload,
    ) -> Result<ScheduleResponse, ServiceError> {
        let schedule = validate_schedule(payload.schedule)?;
        let added = self.orchestrator.schedules().save(schedule.clone()).await?;
        tracing::info!(
            "{} schedule {} ({})",
            if added { "Added" } else { "Updated" },
            schedule.id,
            schedule.target
        );
        Ok(ScheduleResponse { schedule })
    }

    pub async fn delete_schedule(
        &self,
        payload: DeleteSchedulePayload,
    ) -> Result<Empty, ServiceError> {
        let id = payload
            .schedule_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::Validation("Schedule ID is required".to_string()))?;

        match self.orchestrator.schedules().delete(&id).await {
            Ok(()) => {
                tracing::info!("Deleted schedule {}", id);
                Ok(Empty {})
            }
            Err(StoreError::NotFound) => Err(ServiceError::NotFound("Schedule not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn run_scheduled_traceroutes(
        &self,
        payload: RunScheduledPayload,
    ) -> Result<RunSummary, ServiceError> {
        let selection = Selection::from_request(payload.schedule_id, payload.force_run);
        Ok(self.orchestrator.run(&selection).await?)
    }

    /// Format a traceroute result into log records and submit them.
    pub async fn ingest_logs(
        &self,
        payload: IngestLogsPayload,
    ) -> Result<IngestResponse, ServiceError> {
        let result = decode_result(payload.traceroute_result)?;
        let ctx = RecordContext {
            schedule_name: payload.schedule_name,
            ..Default::default()
        };
        let records = format_records(&result, &ctx);
        self.orchestrator.sink().submit(&records).await?;

        tracing::info!("Ingested {} logs for {}", records.len(), result.target);
        Ok(IngestResponse {
            records_ingested: records.len(),
        })
    }

    /// Run an interactive traceroute.
    pub async fn run_traceroute(
        &self,
        payload: TraceroutePayload,
    ) -> Result<TracerouteResponse, ServiceError> {
        let target = payload.target.trim();
        if target.is_empty() {
            return Err(ServiceError::Validation("Target is required".to_string()));
        }
        let result = self.orchestrator.simulator().run(target).await?;
        Ok(TracerouteResponse { result })
    }

    pub async fn geolocate(&self, payload: GeolocatePayload) -> Result<GeolocateResponse, ServiceError> {
        if is_private_ip(&payload.ip) {
            return Err(ServiceError::Validation("Private IP address".to_string()));
        }
        match self.orchestrator.simulator().geo().lookup(&payload.ip).await {
            Some(data) => Ok(GeolocateResponse { data }),
            None => Err(ServiceError::NotFound("All geolocation APIs failed".to_string())),
        }
    }

    /// Run one schedule on demand with an execution id.
    pub async fn run_action(&self, payload: RunActionPayload) -> Result<ActionOutcome, ServiceError> {
        let id = payload
            .schedule_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::Validation("Schedule ID is required".to_string()))?;
        Ok(self.orchestrator.run_action(&id).await?)
    }
}

fn validate_schedule(raw: Option<Value>) -> Result<Schedule, ServiceError> {
    let invalid = || ServiceError::Validation("Invalid schedule data".to_string());

    let schedule: Schedule = raw
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(invalid)?;

    if schedule.id.trim().is_empty() || schedule.target.trim().is_empty() {
        return Err(invalid());
    }
    if schedule.interval_minutes < 1 {
        return Err(ServiceError::Validation(
            "Interval must be at least 1 minute".to_string(),
        ));
    }
    Ok(schedule)
}
