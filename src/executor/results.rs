// ABOUTME: Results executor for events that finished recently.
// ABOUTME: Polls each awaiting event once per run through the event_results quota.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{SyncContext, SyncExecutor};
use crate::coordinator::{Endpoint, JobType, SyncResult};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;

pub const DEFAULT_RESULTS_LOOKBACK_HOURS: u32 = 24;

/// Fetches results of tracked events that started within the lookback
/// window and have none saved yet. Empty results mean "not published yet";
/// the event stays pending for the next run.
pub struct ResultsSyncExecutor {
    ctx: SyncContext,
    lookback: chrono::Duration,
}

impl ResultsSyncExecutor {
    pub fn new(ctx: SyncContext, lookback_hours: u32) -> Self {
        Self {
            ctx,
            lookback: chrono::Duration::hours(i64::from(lookback_hours)),
        }
    }

    async fn sync(&self, metrics: &mut SyncMetrics) -> Result<(), SyncError> {
        let api = &self.ctx.api;
        let store = &self.ctx.store;
        let now = self.ctx.clock.now();

        let pending = store
            .events_awaiting_results(now - self.lookback, now)
            .await
            .map_err(SyncError::Store)?;
        if pending.is_empty() {
            debug!("no events awaiting results");
            return Ok(());
        }

        for event_id in pending {
            metrics.processed += 1;
            let fetched = self
                .ctx
                .limiter
                .execute_when_allowed(Endpoint::EventResults, || api.event_results(event_id))
                .await;

            match fetched {
                Ok(rows) if rows.is_empty() => {
                    debug!(event_id, "results not published yet");
                }
                Ok(rows) => {
                    store
                        .save_results(event_id, &rows)
                        .await
                        .map_err(SyncError::Store)?;
                    metrics.created += rows.len() as u32;
                    info!(event_id, finishers = rows.len(), "results saved");
                }
                Err(err) => {
                    warn!(event_id, error = %err, "results sync failed");
                    metrics.record_failure(format!("event {event_id}: {err}"));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncExecutor for ResultsSyncExecutor {
    fn job_type(&self) -> JobType {
        JobType::ResultsSync
    }

    async fn execute(&self) -> SyncResult {
        let mut metrics = SyncMetrics::begin(JobType::ResultsSync, self.ctx.clock.now());
        let outcome = self.sync(&mut metrics).await;
        self.ctx.conclude(metrics, outcome).await
    }
}
