// ABOUTME: Smart event sync driver: near events resync often, far events rarely.
// ABOUTME: Tracks per-event last sync time and prunes events no longer upcoming.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{TickGuard, Timer};
use crate::api::UpcomingEvent;
use crate::config::{EventSyncConfig, minutes};
use crate::coordinator::{Coordinator, Endpoint, JobType};
use crate::error::SyncError;
use crate::executor::{EventSyncExecutor, SyncContext};

const DRIVER: &str = "SMART_EVENT_SYNC";

/// What one tick decided and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTickReport {
    /// Upcoming events inside the lookahead window.
    pub upcoming: usize,
    pub near: usize,
    pub far: usize,
    /// Jobs queued, with the events each carried.
    pub queued: Vec<(JobType, Vec<u64>)>,
    /// Jobs that returned an error.
    pub failed: Vec<JobType>,
    /// Tracking entries dropped because their event is no longer upcoming.
    pub pruned: usize,
}

struct Inner {
    coordinator: Coordinator,
    ctx: SyncContext,
    executor: EventSyncExecutor,
    config: EventSyncConfig,
    last_synced: Mutex<HashMap<u64, DateTime<Utc>>>,
    syncing: AtomicBool,
    timer: Timer,
}

/// Event signup driver.
///
/// Each tick fetches upcoming events and splits them into near (starting
/// within `near_threshold_minutes`) and far. An event is due when it was
/// never synced or its family interval elapsed since its last sync. Due
/// events are queued as `NearEventSync` and `FarEventSync` jobs, or as one
/// `CombinedEventSync` job in combined mode.
#[derive(Clone)]
pub struct SmartEventSync {
    inner: Arc<Inner>,
}

impl SmartEventSync {
    pub fn new(coordinator: Coordinator, ctx: SyncContext, config: EventSyncConfig) -> Self {
        let executor = EventSyncExecutor::new(ctx.clone());
        Self {
            inner: Arc::new(Inner {
                coordinator,
                ctx,
                executor,
                config,
                last_synced: Mutex::new(HashMap::new()),
                syncing: AtomicBool::new(false),
                timer: Timer::default(),
            }),
        }
    }

    pub async fn start(&self) {
        let this = self.clone();
        let period = minutes(self.inner.config.check_interval_minutes);
        self.inner
            .timer
            .start(DRIVER, period, move || {
                let this = this.clone();
                async move {
                    this.run_tick().await;
                }
            })
            .await;
    }

    pub async fn stop(&self) {
        self.inner.timer.stop(DRIVER).await;
    }

    pub async fn restart(&self) {
        self.stop().await;
        self.start().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.timer.is_running().await
    }

    /// Last sync time of every tracked event.
    pub async fn tracked_events(&self) -> BTreeMap<u64, DateTime<Utc>> {
        self.inner
            .last_synced
            .lock()
            .await
            .iter()
            .map(|(id, at)| (*id, *at))
            .collect()
    }

    /// One check: fetch, partition, queue what is due, prune.
    ///
    /// Returns `None` if skipped because another tick is in flight. Errors
    /// are logged and end the tick; they never stop the timer.
    pub async fn run_tick(&self) -> Option<EventTickReport> {
        let Some(_guard) = TickGuard::try_begin(&self.inner.syncing) else {
            info!(driver = DRIVER, "already syncing, skipping tick");
            return None;
        };

        match self.check().await {
            Ok(report) => {
                info!(
                    upcoming = report.upcoming,
                    near = report.near,
                    far = report.far,
                    jobs = report.queued.len(),
                    pruned = report.pruned,
                    "event sync check complete"
                );
                Some(report)
            }
            Err(err) => {
                warn!(error = %err, "event sync check failed");
                Some(EventTickReport::default())
            }
        }
    }

    async fn check(&self) -> Result<EventTickReport, SyncError> {
        let config = &self.inner.config;
        let api = &self.inner.ctx.api;

        let events = self
            .inner
            .ctx
            .limiter
            .execute_with_limit(Endpoint::EventsUpcoming, || {
                api.upcoming_events(config.lookahead_hours)
            })
            .await?;

        let now = self.inner.ctx.clock.now();
        let (near, far) = split_upcoming(events, now, config);
        let upcoming: HashSet<u64> = near.iter().chain(&far).map(|e| e.id).collect();

        let mut report = EventTickReport {
            upcoming: near.len() + far.len(),
            near: near.len(),
            far: far.len(),
            ..EventTickReport::default()
        };

        let due_near = self.due(near, config.near_interval_minutes, now).await;
        let due_far = self.due(far, config.far_interval_minutes, now).await;
        debug!(due_near = due_near.len(), due_far = due_far.len(), "events due");

        let batches = if config.combined {
            let all: Vec<_> = due_near.into_iter().chain(due_far).collect();
            vec![(JobType::CombinedEventSync, all)]
        } else {
            vec![
                (JobType::NearEventSync, due_near),
                (JobType::FarEventSync, due_far),
            ]
        };

        for (job_type, batch) in batches {
            if batch.is_empty() {
                continue;
            }
            let ids: Vec<u64> = batch.iter().map(|e| e.id).collect();
            report.queued.push((job_type, ids.clone()));

            if self.queue(job_type, batch).await {
                let synced_at = self.inner.ctx.clock.now();
                let mut tracked = self.inner.last_synced.lock().await;
                for id in ids {
                    tracked.insert(id, synced_at);
                }
            } else {
                report.failed.push(job_type);
            }
        }

        report.pruned = self.prune(&upcoming).await;
        Ok(report)
    }

    /// Events never synced or whose interval elapsed.
    async fn due(
        &self,
        events: Vec<UpcomingEvent>,
        interval_minutes: u32,
        now: DateTime<Utc>,
    ) -> Vec<UpcomingEvent> {
        let interval = chrono::Duration::minutes(i64::from(interval_minutes));
        let tracked = self.inner.last_synced.lock().await;
        events
            .into_iter()
            .filter(|e| tracked.get(&e.id).is_none_or(|last| now - *last >= interval))
            .collect()
    }

    /// Queue one batch and report whether it succeeded.
    async fn queue(&self, job_type: JobType, batch: Vec<UpcomingEvent>) -> bool {
        let executor = self.inner.executor.clone();
        let count = batch.len();
        info!(job_type = %job_type, events = count, "queueing event sync");

        let result = self
            .inner
            .coordinator
            .queue_sync(job_type, move || async move {
                executor.run(job_type, &batch).await
            })
            .await;

        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(job_type = %job_type, error = %err, "event sync failed");
                false
            }
        }
    }

    async fn prune(&self, upcoming: &HashSet<u64>) -> usize {
        let mut tracked = self.inner.last_synced.lock().await;
        let before = tracked.len();
        tracked.retain(|id, _| upcoming.contains(id));
        let pruned = before - tracked.len();
        if pruned > 0 {
            debug!(pruned, tracking = tracked.len(), "pruned stale events");
        }
        pruned
    }
}

/// Keep events starting between `now` and the lookahead horizon, split into
/// near (within `near_threshold_minutes`) and far.
pub(crate) fn split_upcoming(
    events: Vec<UpcomingEvent>,
    now: DateTime<Utc>,
    config: &EventSyncConfig,
) -> (Vec<UpcomingEvent>, Vec<UpcomingEvent>) {
    let horizon = now + chrono::Duration::hours(i64::from(config.lookahead_hours));
    let near_threshold = chrono::Duration::minutes(i64::from(config.near_threshold_minutes));
    events
        .into_iter()
        .filter(|e| e.start >= now && e.start <= horizon)
        .partition(|e| e.start - now <= near_threshold)
}
