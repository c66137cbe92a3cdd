// ABOUTME: Sync executors - the work functions the coordinator runs.
// ABOUTME: Each fetches through the rate limiter, persists, and records metrics.

mod events;
mod results;
mod rider;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::api::RacingApi;
use crate::clock::Clock;
use crate::coordinator::{JobType, RateLimiter, SyncResult};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::store::SyncStore;

pub use events::EventSyncExecutor;
pub use results::{DEFAULT_RESULTS_LOOKBACK_HOURS, ResultsSyncExecutor};
pub use rider::{RiderSyncExecutor, TEAM_CLUB_ID};

/// A self-contained sync run a timer driver can queue.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// The job family this executor runs as.
    fn job_type(&self) -> JobType;

    /// Run once, returning the recorded metrics.
    async fn execute(&self) -> SyncResult;
}

/// Collaborators every executor needs.
#[derive(Clone)]
pub struct SyncContext {
    pub api: Arc<dyn RacingApi>,
    pub store: Arc<dyn SyncStore>,
    pub limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(
        api: Arc<dyn RacingApi>,
        store: Arc<dyn SyncStore>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            store,
            limiter,
            clock,
        }
    }

    /// Seal `metrics` according to `outcome`, record them, and return the
    /// run's result.
    ///
    /// A failed run is recorded with status error before its error is
    /// returned. A store failure while recording a failed run is logged and
    /// does not mask the original error.
    pub(crate) async fn conclude(
        &self,
        metrics: SyncMetrics,
        outcome: Result<(), SyncError>,
    ) -> SyncResult {
        let now = self.clock.now();
        match outcome {
            Ok(()) => {
                let metrics = metrics.finish(now);
                self.store
                    .record_metrics(&metrics)
                    .await
                    .map_err(SyncError::Store)?;
                Ok(metrics)
            }
            Err(err) => {
                let metrics = metrics.fail(now, &err);
                if let Err(store_err) = self.store.record_metrics(&metrics).await {
                    warn!(
                        job_type = %metrics.job_type,
                        error = %store_err,
                        "failed to record metrics of failed sync"
                    );
                }
                Err(err)
            }
        }
    }
}
