//! Schedule collection persisted as one JSON document under a state key.

use super::state::{StateStore, StoreError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Attempts made for one read-modify-write before giving up on conflicts.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Upper bound used when projecting `nextRun` (roughly a century).
const MAX_INTERVAL_MINUTES: i64 = 100 * 366 * 24 * 60;

/// A recurring traceroute job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub target: String,
    pub interval_minutes: i64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl Schedule {
    /// Record a run attempt at `now`.
    pub fn stamp_run(&mut self, now: DateTime<Utc>) {
        let minutes = self
            .interval_minutes
            .clamp(-MAX_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES);
        self.last_run = Some(now);
        self.next_run = Some(
            now.checked_add_signed(ChronoDuration::minutes(minutes))
                .unwrap_or(now),
        );
    }
}

/// Insert `schedule`, or replace the entry with the same id in place.
///
/// Returns true when the schedule was appended.
pub fn upsert(schedules: &mut Vec<Schedule>, schedule: Schedule) -> bool {
    match schedules.iter_mut().find(|s| s.id == schedule.id) {
        Some(existing) => {
            *existing = schedule;
            false
        }
        None => {
            schedules.push(schedule);
            true
        }
    }
}

/// Remove the schedule with the given id.
pub fn remove(schedules: &mut Vec<Schedule>, id: &str) -> Option<Schedule> {
    let index = schedules.iter().position(|s| s.id == id)?;
    Some(schedules.remove(index))
}

/// Store for the whole schedule collection.
#[derive(Clone)]
pub struct ScheduleStore {
    state: Arc<dyn StateStore>,
    key: String,
}

impl ScheduleStore {
    pub fn new(state: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            state,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load all schedules in stored order. A missing key is an empty collection.
    ///
    /// Entries that do not decode as a schedule are left out.
    pub async fn load(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.load_versioned().await?.0.schedules)
    }

    async fn load_versioned(&self) -> Result<(Collection, Option<u64>), StoreError> {
        match self.state.get(&self.key).await? {
            Some(stored) => Ok((Collection::decode(&stored.value)?, Some(stored.version))),
            None => Ok((Collection::default(), None)),
        }
    }

    /// Insert or replace a schedule. Returns true when it was newly added.
    pub async fn save(&self, schedule: Schedule) -> Result<bool, StoreError> {
        self.update_collection(|collection| {
            collection.forget_unreadable(&schedule.id);
            Ok(upsert(&mut collection.schedules, schedule.clone()))
        })
        .await
    }

    /// Delete a schedule by id, including entries that no longer decode.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.update_collection(|collection| {
            if remove(&mut collection.schedules, id).is_some() || collection.forget_unreadable(id) {
                Ok(())
            } else {
                Err(StoreError::NotFound)
            }
        })
        .await
    }

    /// Apply `mutate` to the freshest collection and write it back.
    ///
    /// The write is conditional on the version that was read. On a conflict
    /// the collection is re-read and `mutate` runs again, so it must only
    /// depend on its argument. An error from `mutate` aborts without writing.
    pub async fn update<F, T>(&self, mut mutate: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Vec<Schedule>) -> Result<T, StoreError> + Send,
        T: Send,
    {
        self.update_collection(|collection| mutate(&mut collection.schedules))
            .await
    }

    async fn update_collection<F, T>(&self, mut mutate: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Collection) -> Result<T, StoreError> + Send,
        T: Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut collection, version) = self.load_versioned().await?;
            let outcome = mutate(&mut collection)?;
            let body = collection.encode()?;

            match self.state.set(&self.key, &body, version).await {
                Ok(_) => return Ok(outcome),
                Err(StoreError::Conflict(_)) => {
                    tracing::warn!(
                        "Schedule write conflict on {} (attempt {}/{}), retrying",
                        self.key,
                        attempt,
                        MAX_WRITE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Conflict(self.key.clone()))
    }
}

/// The stored list, split into decodable schedules and raw entries that are not.
///
/// Raw entries are written back unchanged after the schedules.
#[derive(Debug, Default)]
struct Collection {
    schedules: Vec<Schedule>,
    unreadable: Vec<Value>,
}

impl Collection {
    fn decode(raw: &str) -> Result<Self, StoreError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let Value::Array(entries) = value else {
            tracing::warn!("Stored schedules are not a list, treating as empty");
            return Ok(Self::default());
        };

        let mut collection = Self::default();
        for entry in entries {
            match Schedule::deserialize(&entry) {
                Ok(schedule) => collection.schedules.push(schedule),
                Err(e) => {
                    tracing::warn!(
                        "Skipping unreadable schedule {}: {}",
                        entry_id(&entry).unwrap_or("<no id>"),
                        e
                    );
                    collection.unreadable.push(entry);
                }
            }
        }
        Ok(collection)
    }

    fn encode(&self) -> Result<String, StoreError> {
        let mut entries = self
            .schedules
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        entries.extend(self.unreadable.iter().cloned());
        serde_json::to_string(&entries).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Drop raw entries with the given id. Returns true when any were dropped.
    fn forget_unreadable(&mut self, id: &str) -> bool {
        let before = self.unreadable.len();
        self.unreadable.retain(|entry| entry_id(entry) != Some(id));
        self.unreadable.len() != before
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id")?.as_str()
}
