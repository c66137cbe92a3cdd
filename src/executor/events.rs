// ABOUTME: Event signup executor for near, far, and combined event syncs.
// ABOUTME: Fetches signups per event, waiting out the event_signups quota.

use tracing::{debug, warn};

use super::SyncContext;
use crate::api::UpcomingEvent;
use crate::coordinator::{Endpoint, JobType, SyncResult};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;

/// Refreshes signup snapshots for a batch of events.
///
/// Signups allow one call per minute, so a batch of `n` events takes about
/// `n - 1` minutes; the executor waits for each window rather than failing.
/// A single event's failure is counted and the batch continues.
#[derive(Clone)]
pub struct EventSyncExecutor {
    ctx: SyncContext,
}

impl EventSyncExecutor {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Sync signups of `events` as a `job_type` run.
    pub async fn run(&self, job_type: JobType, events: &[UpcomingEvent]) -> SyncResult {
        let mut metrics = SyncMetrics::begin(job_type, self.ctx.clock.now());
        let outcome = self.sync(events, &mut metrics).await;
        self.ctx.conclude(metrics, outcome).await
    }

    async fn sync(
        &self,
        events: &[UpcomingEvent],
        metrics: &mut SyncMetrics,
    ) -> Result<(), SyncError> {
        let api = &self.ctx.api;
        let store = &self.ctx.store;

        store.save_events(events).await.map_err(SyncError::Store)?;

        for event in events {
            metrics.processed += 1;
            let fetched = self
                .ctx
                .limiter
                .execute_when_allowed(Endpoint::EventSignups, || api.event_signups(event.id))
                .await;

            match fetched {
                Ok(signups) => {
                    debug!(event_id = event.id, signups = signups.len(), "signups fetched");
                    store
                        .save_signups(event.id, &signups)
                        .await
                        .map_err(SyncError::Store)?;
                    metrics.updated += signups.len() as u32;
                }
                Err(err) => {
                    warn!(event_id = event.id, error = %err, "signup sync failed");
                    metrics.record_failure(format!("event {}: {err}", event.id));
                }
            }
        }
        Ok(())
    }
}
