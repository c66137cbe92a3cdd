// ABOUTME: Integrated batch sync: riders, then events, then results, in one pass.
// ABOUTME: Refuses a batch that ran recently unless forced; reports each phase.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::TickGuard;
use super::event_sync::split_upcoming;
use crate::config::{BatchSyncConfig, EventSyncConfig, SyncConfig};
use crate::coordinator::{Coordinator, Endpoint, JobType, SyncResult};
use crate::error::SyncError;
use crate::executor::{
    EventSyncExecutor, ResultsSyncExecutor, RiderSyncExecutor, SyncContext, SyncExecutor,
};
use crate::metrics::SyncMetrics;

const BATCH_SYNC: &str = "BATCH_SYNC";

/// Which phases to run, and whether to bypass the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub skip_riders: bool,
    pub skip_events: bool,
    pub skip_results: bool,
    /// Run every phase through `force_sync` and ignore the recent-run guard.
    pub force: bool,
}

/// Per-phase metrics of one batch. A skipped phase, or an event family with
/// nothing upcoming, is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub riders: Option<SyncMetrics>,
    pub near_events: Option<SyncMetrics>,
    pub far_events: Option<SyncMetrics>,
    pub results: Option<SyncMetrics>,
    /// Failures of the event and results phases, which do not stop the batch.
    pub errors: Vec<String>,
}

impl BatchSyncReport {
    fn begin(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            riders: None,
            near_events: None,
            far_events: None,
            results: None,
            errors: Vec::new(),
        }
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.finished_at = now;
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncStatus {
    pub is_running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub minutes_since_last_sync: Option<i64>,
}

struct Inner {
    coordinator: Coordinator,
    ctx: SyncContext,
    riders: Arc<RiderSyncExecutor>,
    events: EventSyncExecutor,
    results: Arc<ResultsSyncExecutor>,
    event_config: EventSyncConfig,
    config: BatchSyncConfig,
    running: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

/// Runs the three sync families back to back in dependency order.
///
/// Riders go first; a rider failure aborts the batch since events and
/// results build on the roster. Event and results failures are noted in the
/// report and the batch carries on. Phases go through the coordinator, so
/// they never overlap another executor.
#[derive(Clone)]
pub struct BatchSync {
    inner: Arc<Inner>,
}

impl BatchSync {
    pub fn new(coordinator: Coordinator, ctx: SyncContext, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                riders: Arc::new(RiderSyncExecutor::new(
                    ctx.clone(),
                    config.rider_sync.club_id,
                )),
                events: EventSyncExecutor::new(ctx.clone()),
                results: Arc::new(ResultsSyncExecutor::new(
                    ctx.clone(),
                    config.results_sync.lookback_hours,
                )),
                coordinator,
                ctx,
                event_config: config.event_sync.clone(),
                config: config.batch_sync.clone(),
                running: AtomicBool::new(false),
                last_sync: Mutex::new(None),
            }),
        }
    }

    pub async fn status(&self) -> BatchSyncStatus {
        let last_sync_at = *self.inner.last_sync.lock().await;
        let now = self.inner.ctx.clock.now();
        BatchSyncStatus {
            is_running: self.inner.running.load(Ordering::Acquire),
            last_sync_at,
            minutes_since_last_sync: last_sync_at.map(|at| (now - at).num_minutes()),
        }
    }

    /// Run one batch.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] while another batch is in
    /// flight, with [`SyncError::RecentlySynced`] when an unforced batch
    /// comes too soon after the last one, and with the rider phase's error
    /// if that phase fails.
    pub async fn run(&self, options: BatchOptions) -> Result<BatchSyncReport, SyncError> {
        let Some(_guard) = TickGuard::try_begin(&self.inner.running) else {
            return Err(SyncError::AlreadyRunning(BATCH_SYNC.to_string()));
        };

        let now = self.inner.ctx.clock.now();
        let last_sync = *self.inner.last_sync.lock().await;
        if let Some(last_sync_at) = last_sync.filter(|_| self.inner.config.skip_if_recent) {
            let threshold =
                chrono::Duration::minutes(i64::from(self.inner.config.recent_threshold_minutes));
            if !options.force && now - last_sync_at < threshold {
                info!(last_sync_at = %last_sync_at, "batch sync ran recently, refusing");
                return Err(SyncError::RecentlySynced {
                    last_sync_at,
                    retry_at: last_sync_at + threshold,
                });
            }
        }

        info!(?options, "batch sync starting");
        let mut report = BatchSyncReport::begin(now);

        if !options.skip_riders {
            let riders = self.inner.riders.clone();
            let metrics = self
                .dispatch(JobType::RiderSync, options.force, move || async move {
                    riders.execute().await
                })
                .await
                .inspect_err(|err| warn!(error = %err, "batch rider phase failed, aborting"))?;
            report.riders = Some(metrics);
        }

        if !options.skip_events {
            if let Err(err) = self.sync_events(options.force, &mut report).await {
                warn!(error = %err, "batch event phase failed");
                report.errors.push(format!("events: {err}"));
            }
        }

        if !options.skip_results {
            let results = self.inner.results.clone();
            match self
                .dispatch(JobType::ResultsSync, options.force, move || async move {
                    results.execute().await
                })
                .await
            {
                Ok(metrics) => report.results = Some(metrics),
                Err(err) => {
                    warn!(error = %err, "batch results phase failed");
                    report.errors.push(format!("results: {err}"));
                }
            }
        }

        report.finish(self.inner.ctx.clock.now());
        *self.inner.last_sync.lock().await = Some(report.finished_at);
        info!(
            duration_ms = report.duration_ms,
            errors = report.errors.len(),
            "batch sync complete"
        );
        Ok(report)
    }

    /// Fetch upcoming events and sync near, then far signups.
    async fn sync_events(
        &self,
        force: bool,
        report: &mut BatchSyncReport,
    ) -> Result<(), SyncError> {
        let config = &self.inner.event_config;
        let api = &self.inner.ctx.api;
        let events = self
            .inner
            .ctx
            .limiter
            .execute_with_limit(Endpoint::EventsUpcoming, || {
                api.upcoming_events(config.lookahead_hours)
            })
            .await?;

        let (near, far) = split_upcoming(events, self.inner.ctx.clock.now(), config);
        for (job_type, batch) in [(JobType::NearEventSync, near), (JobType::FarEventSync, far)] {
            if batch.is_empty() {
                continue;
            }
            let executor = self.inner.events.clone();
            let result = self
                .dispatch(job_type, force, move || async move {
                    executor.run(job_type, &batch).await
                })
                .await;
            match (job_type, result) {
                (JobType::NearEventSync, Ok(metrics)) => report.near_events = Some(metrics),
                (_, Ok(metrics)) => report.far_events = Some(metrics),
                (_, Err(err)) => {
                    warn!(job_type = %job_type, error = %err, "batch event sync failed");
                    report.errors.push(format!("{job_type}: {err}"));
                }
            }
        }
        Ok(())
    }

    async fn dispatch<F, Fut>(&self, job_type: JobType, force: bool, executor: F) -> SyncResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult> + Send + 'static,
    {
        if force {
            self.inner.coordinator.force_sync(job_type, executor).await
        } else {
            self.inner.coordinator.queue_sync(job_type, executor).await
        }
    }
}
