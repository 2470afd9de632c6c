//! Retention sweeper
//!
//! Background task that periodically evicts stale jobs and their files. The
//! task is owned: `start` spawns it, `stop` cancels it and waits for it to exit.

use crate::jobs::{current_timestamp_ms, Job};
use crate::store::JobStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct RetentionSweeper {
    store: JobStore,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    pub fn new(store: JobStore, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Run one sweep as of `now_ms`, returning the evicted jobs
    pub fn sweep_once(&self, now_ms: i64) -> Vec<Job> {
        sweep(&self.store, self.retention, now_ms)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the periodic task. The first sweep runs one interval from now.
    /// Calling `start` on a running sweeper does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let store = self.store.clone();
        let retention = self.retention;
        let period = self.interval.max(Duration::from_millis(1));
        let cancel = self.cancel.clone();

        tracing::info!(
            interval_secs = period.as_secs(),
            retention_secs = retention.as_secs(),
            "Retention sweeper started"
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep(&store, retention, current_timestamp_ms());
                    }
                }
            }
            tracing::info!("Retention sweeper stopped");
        }));
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Retention sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn sweep(store: &JobStore, retention: Duration, now_ms: i64) -> Vec<Job> {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    let swept = store.sweep_expired(now_ms, retention_ms);
    if swept.is_empty() {
        tracing::debug!(remaining = store.len(), "Sweep found nothing to evict");
    } else {
        for job in &swept {
            tracing::debug!(job_id = %job.id, status = %job.status, "Swept job");
        }
        tracing::info!(
            swept = swept.len(),
            remaining = store.len(),
            "Evicted stale jobs"
        );
    }
    swept
}
