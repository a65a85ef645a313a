//! Runs due schedules and records their results.

use super::due::{select_due, SelectError, Selection};
use crate::ingest::{format_records, LogSink, RecordContext};
use crate::store::{Schedule, ScheduleStore, StoreError};
use crate::trace::{Simulator, TraceError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Orchestrator error types.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Per-schedule outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRunResult {
    pub schedule_id: String,
    pub schedule_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_ingested: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one orchestrator invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub schedules_checked: usize,
    pub schedules_run: usize,
    /// Whether the updated collection was written back.
    pub persisted: bool,
    pub results: Vec<ScheduleRunResult>,
}

/// Outcome of a single-schedule action run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub schedule_name: String,
    pub target: String,
    pub hops: usize,
    pub execution_id: String,
    pub message: String,
}

struct Execution {
    hops: usize,
    records_ingested: usize,
}

/// Composes selection, simulation, log ingestion and schedule updates.
pub struct Orchestrator {
    schedules: ScheduleStore,
    simulator: Simulator,
    sink: Arc<dyn LogSink>,
}

impl Orchestrator {
    pub fn new(schedules: ScheduleStore, simulator: Simulator, sink: Arc<dyn LogSink>) -> Self {
        Self {
            schedules,
            simulator,
            sink,
        }
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }

    /// Run every selected schedule in order.
    ///
    /// A schedule whose traceroute fails is reported and left unstamped, so
    /// the next sweep picks it up again. Log ingestion failures are not
    /// failures of the schedule.
    pub async fn run(&self, selection: &Selection) -> Result<RunSummary, RunError> {
        let schedules = self.schedules.load().await?;
        let now = Utc::now();

        let selected: Vec<Schedule> = select_due(&schedules, selection, now)?
            .into_iter()
            .cloned()
            .collect();

        tracing::info!(
            "Checked {} schedules, {} to run",
            schedules.len(),
            selected.len()
        );

        let mut results = Vec::with_capacity(selected.len());
        let mut completed = Vec::new();

        for schedule in &selected {
            tracing::info!(
                "Running traceroute for {} ({})",
                schedule.name,
                schedule.target
            );
            let ctx = RecordContext::schedule(&schedule.id, &schedule.name);

            match self.execute(schedule, &ctx).await {
                Ok(execution) => {
                    completed.push(schedule.id.clone());
                    results.push(ScheduleRunResult {
                        schedule_id: schedule.id.clone(),
                        schedule_name: schedule.name.clone(),
                        success: true,
                        hops: Some(execution.hops),
                        records_ingested: Some(execution.records_ingested),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!("Traceroute failed for {}: {}", schedule.name, e);
                    results.push(ScheduleRunResult {
                        schedule_id: schedule.id.clone(),
                        schedule_name: schedule.name.clone(),
                        success: false,
                        hops: None,
                        records_ingested: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let persisted = if selected.is_empty() {
            false
        } else {
            match self.stamp(&completed, now).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(
                        "Failed to persist schedule run times to {}: {}",
                        self.schedules.key(),
                        e
                    );
                    false
                }
            }
        };

        Ok(RunSummary {
            schedules_checked: schedules.len(),
            schedules_run: selected.len(),
            persisted,
            results,
        })
    }

    /// Run one schedule on demand, whether or not it is enabled.
    ///
    /// Records carry an execution id so the batch can be found in the logs.
    pub async fn run_action(&self, schedule_id: &str) -> Result<ActionOutcome, RunError> {
        let schedules = self.schedules.load().await?;
        let schedule = schedules
            .into_iter()
            .find(|s| s.id == schedule_id)
            .ok_or_else(|| SelectError::NotFound(schedule_id.to_string()))?;

        let started = Utc::now();
        let execution_id = format!("traceroute-{}-{}", schedule.id, started.timestamp_millis());
        let ctx = RecordContext {
            execution_id: Some(execution_id.clone()),
            timestamp: Some(started),
            ..RecordContext::schedule(&schedule.id, &schedule.name)
        };

        let execution = self.execute(&schedule, &ctx).await?;
        self.stamp(&[schedule.id.clone()], Utc::now()).await?;

        tracing::info!(
            "Action run of {} completed: {} hops, execution {}",
            schedule.name,
            execution.hops,
            execution_id
        );

        Ok(ActionOutcome {
            message: format!(
                "Traceroute completed for {}. Query logs with: fetch logs | filter log.source == \"traceroute-app\" and execution.id == \"{}\"",
                schedule.name, execution_id
            ),
            schedule_name: schedule.name,
            target: schedule.target,
            hops: execution.hops,
            execution_id,
        })
    }

    async fn execute(&self, schedule: &Schedule, ctx: &RecordContext) -> Result<Execution, TraceError> {
        let result = self.simulator.run(&schedule.target).await?;
        let records = format_records(&result, ctx);

        let records_ingested = match self.sink.submit(&records).await {
            Ok(()) => {
                tracing::info!("Ingested {} logs for {}", records.len(), schedule.name);
                records.len()
            }
            Err(e) => {
                tracing::warn!("Log ingestion failed for {}: {}", schedule.name, e);
                0
            }
        };

        Ok(Execution {
            hops: result.hops.len(),
            records_ingested,
        })
    }

    /// Stamp run times onto the current collection, by id.
    ///
    /// Only the stamped fields change, so edits made by other writers since
    /// the collection was loaded survive. Deleted schedules stay deleted.
    async fn stamp(&self, ids: &[String], now: DateTime<Utc>) -> Result<(), StoreError> {
        self.schedules
            .update(|schedules| {
                for schedule in schedules.iter_mut().filter(|s| ids.contains(&s.id)) {
                    schedule.stamp_run(now);
                }
                Ok(())
            })
            .await
    }
}
