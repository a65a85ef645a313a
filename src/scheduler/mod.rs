//! Scheduler module for running due traceroutes.

mod due;
mod orchestrator;

pub use due::*;
pub use orchestrator::*;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Periodic background sweep over all schedules.
pub struct Sweeper {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl Sweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the sweep loop. A zero interval leaves sweeping to callers.
    pub async fn start(&self) {
        if self.interval.is_zero() {
            tracing::info!("Sweeper: periodic sweeps disabled");
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        {
            let mut stop_guard = self.stop.lock().await;
            if stop_guard.is_some() {
                return; // Already running
            }
            *stop_guard = Some(tx);
        }

        let orchestrator = self.orchestrator.clone();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Sweeper: sweeping every {:?}", self.interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        sweep_once(&orchestrator).await;
                    }
                }
            }
            tracing::info!("Sweeper: stopped");
        });
    }

    /// Stop the sweep loop.
    pub async fn stop(&self) {
        let mut stop = self.stop.lock().await;
        if let Some(tx) = stop.take() {
            let _ = tx.send(());
        }
    }
}

async fn sweep_once(orchestrator: &Orchestrator) {
    match orchestrator.run(&Selection::Sweep).await {
        Ok(summary) => {
            let failed = summary.results.iter().filter(|r| !r.success).count();
            if summary.schedules_run > 0 {
                tracing::info!(
                    "Sweeper: ran {} of {} schedules ({} failed, persisted: {})",
                    summary.schedules_run,
                    summary.schedules_checked,
                    failed,
                    summary.persisted
                );
            }
        }
        Err(e) => tracing::error!("Sweeper: sweep failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStateStore, Schedule, ScheduleStore};
    use crate::test_support::{simulator, MemorySink};

    #[tokio::test]
    async fn test_sweeper_runs_due_schedules() {
        let store = ScheduleStore::new(Arc::new(MemoryStateStore::new()), "schedules");
        store
            .save(Schedule {
                id: "s1".to_string(),
                name: "Google DNS".to_string(),
                target: "8.8.8.8".to_string(),
                interval_minutes: 60,
                enabled: true,
                last_run: None,
                next_run: None,
                workflow_id: None,
            })
            .await
            .unwrap();

        let sink = Arc::new(MemorySink::default());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            simulator(None).0,
            sink.clone(),
        ));
        let sweeper = Sweeper::new(orchestrator, Duration::from_millis(20));

        sweeper.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.stop().await;

        let stored = store.load().await.unwrap();
        assert!(stored[0].last_run.is_some());
        // Interval is an hour, so only the first sweep ran it.
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_never_starts() {
        let store = ScheduleStore::new(Arc::new(MemoryStateStore::new()), "schedules");
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            simulator(None).0,
            Arc::new(MemorySink::default()),
        ));
        let sweeper = Sweeper::new(orchestrator, Duration::ZERO);
        sweeper.start().await;
        assert!(sweeper.stop.lock().await.is_none());
    }
}
