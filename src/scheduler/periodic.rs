// ABOUTME: Fixed-interval driver that queues one executor per tick.
// ABOUTME: Drives rider sync and results sync; supports manual sync_now triggers.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::{info, warn};

use super::{TickGuard, Timer};
use crate::config::{ResultsSyncConfig, RiderSyncConfig, minutes};
use crate::coordinator::{Coordinator, JobType, SyncResult};
use crate::error::SyncError;
use crate::executor::{ResultsSyncExecutor, RiderSyncExecutor, SyncContext, SyncExecutor};
use crate::metrics::ManualSyncOutcome;

struct Inner {
    coordinator: Coordinator,
    executor: Arc<dyn SyncExecutor>,
    interval: Duration,
    syncing: AtomicBool,
    timer: Timer,
}

/// Queues `executor` with the coordinator every `interval`.
///
/// A tick that fires while the previous one is still in flight is skipped,
/// so a slow executor never piles up queue entries.
#[derive(Clone)]
pub struct PeriodicScheduler {
    inner: Arc<Inner>,
}

/// The rider roster driver.
pub type RiderSyncScheduler = PeriodicScheduler;

impl PeriodicScheduler {
    pub fn new(coordinator: Coordinator, executor: Arc<dyn SyncExecutor>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator,
                executor,
                interval,
                syncing: AtomicBool::new(false),
                timer: Timer::default(),
            }),
        }
    }

    /// Rider sync driver for `config.club_id`.
    pub fn rider_sync(coordinator: Coordinator, ctx: SyncContext, config: &RiderSyncConfig) -> Self {
        let executor = RiderSyncExecutor::new(ctx, config.club_id);
        Self::new(
            coordinator,
            Arc::new(executor),
            minutes(config.interval_minutes),
        )
    }

    /// Results sync driver.
    pub fn results_sync(
        coordinator: Coordinator,
        ctx: SyncContext,
        config: &ResultsSyncConfig,
    ) -> Self {
        let executor = ResultsSyncExecutor::new(ctx, config.lookback_hours);
        Self::new(
            coordinator,
            Arc::new(executor),
            minutes(config.interval_minutes),
        )
    }

    pub fn job_type(&self) -> JobType {
        self.inner.executor.job_type()
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Start the timer; the first tick fires immediately.
    pub async fn start(&self) {
        let this = self.clone();
        self.inner
            .timer
            .start(self.job_type().as_str(), self.inner.interval, move || {
                let this = this.clone();
                async move {
                    this.run_tick().await;
                }
            })
            .await;
    }

    pub async fn stop(&self) {
        self.inner.timer.stop(self.job_type().as_str()).await;
    }

    pub async fn restart(&self) {
        info!(job_type = %self.job_type(), "restarting scheduler");
        self.stop().await;
        self.start().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.timer.is_running().await
    }

    /// Whether a tick or manual sync is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(std::sync::atomic::Ordering::Acquire)
    }

    /// One timer tick: queue the executor and wait for its result.
    ///
    /// Returns `None` if skipped because another tick is in flight. Errors
    /// are logged here and never stop the timer.
    pub async fn run_tick(&self) -> Option<SyncResult> {
        let job_type = self.job_type();
        let Some(_guard) = TickGuard::try_begin(&self.inner.syncing) else {
            info!(job_type = %job_type, "already syncing, skipping tick");
            return None;
        };

        let executor = self.inner.executor.clone();
        let result = self
            .inner
            .coordinator
            .queue_sync(job_type, move || async move { executor.execute().await })
            .await;

        if let Err(err) = &result {
            warn!(job_type = %job_type, error = %err, "scheduled sync failed");
        }
        Some(result)
    }

    /// Run the executor now, bypassing queue and time slot.
    ///
    /// Never fails: refusals and errors are reported in the outcome. The
    /// timer is unaffected.
    pub async fn sync_now(&self) -> ManualSyncOutcome {
        let job_type = self.job_type();
        let Some(_guard) = TickGuard::try_begin(&self.inner.syncing) else {
            return ManualSyncOutcome::refused(
                SyncError::AlreadyRunning(job_type.to_string()).to_string(),
            );
        };

        let executor = self.inner.executor.clone();
        let result = self
            .inner
            .coordinator
            .force_sync(job_type, move || async move { executor.execute().await })
            .await;

        let outcome = ManualSyncOutcome::from(result);
        info!(job_type = %job_type, success = outcome.success, "manual sync finished");
        outcome
    }
}
