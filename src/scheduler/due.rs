//! Deciding which schedules run now.

use crate::store::Schedule;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Selection errors for targeted runs.
#[derive(Error, Debug, PartialEq)]
pub enum SelectError {
    #[error("Schedule not found: {0}")]
    NotFound(String),
    #[error("Schedule is disabled: {0}")]
    Disabled(String),
}

/// Which schedules a run covers.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Every enabled schedule whose interval has elapsed.
    Sweep,
    /// One schedule by id, regardless of its interval.
    Targeted { id: String, force: bool },
}

impl Selection {
    /// An empty or missing id means a sweep.
    pub fn from_request(schedule_id: Option<String>, force: bool) -> Self {
        match schedule_id.filter(|id| !id.is_empty()) {
            Some(id) => Selection::Targeted { id, force },
            None => Selection::Sweep,
        }
    }
}

/// Whether a schedule is due in sweep mode.
///
/// Disabled schedules and non-positive intervals are never due. A schedule
/// that never ran is always due; otherwise it is due once at least
/// `interval_minutes` have elapsed since `last_run`.
pub fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    if !schedule.enabled || schedule.interval_minutes <= 0 {
        return false;
    }

    match schedule.last_run {
        None => true,
        Some(last) => {
            let elapsed_minutes = (now - last).num_milliseconds() as f64 / 60_000.0;
            elapsed_minutes >= schedule.interval_minutes as f64
        }
    }
}

/// Select the schedules to run, in collection order.
pub fn select_due<'a>(
    schedules: &'a [Schedule],
    selection: &Selection,
    now: DateTime<Utc>,
) -> Result<Vec<&'a Schedule>, SelectError> {
    match selection {
        Selection::Targeted { id, force } => {
            let schedule = schedules
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| SelectError::NotFound(id.clone()))?;
            if !schedule.enabled && !force {
                return Err(SelectError::Disabled(schedule.name.clone()));
            }
            Ok(vec![schedule])
        }
        Selection::Sweep => Ok(schedules.iter().filter(|s| is_due(s, now)).collect()),
    }
}
