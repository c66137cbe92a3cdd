// ABOUTME: Rider sync executor: club roster, then bulk profiles, then upsert.
// ABOUTME: Profiles missing from the bulk response are fetched one by one.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{SyncContext, SyncExecutor};
use crate::coordinator::{Endpoint, JobType, SyncResult};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;

/// Club whose roster is synced by default.
pub const TEAM_CLUB_ID: u64 = 11818;

/// Keeps the team roster and rider profiles fresh.
pub struct RiderSyncExecutor {
    ctx: SyncContext,
    club_id: u64,
}

impl RiderSyncExecutor {
    pub fn new(ctx: SyncContext, club_id: u64) -> Self {
        Self { ctx, club_id }
    }

    pub fn club_id(&self) -> u64 {
        self.club_id
    }

    async fn sync(&self, metrics: &mut SyncMetrics) -> Result<(), SyncError> {
        let api = &self.ctx.api;
        let limiter = &self.ctx.limiter;

        let roster = limiter
            .execute_with_limit(Endpoint::ClubMembers, || api.club_members(self.club_id))
            .await?;
        let rider_ids = roster.rider_ids();
        metrics.processed = rider_ids.len() as u32;

        if rider_ids.is_empty() {
            warn!(club_id = self.club_id, "no riders found for club");
            metrics.mark_partial(format!("no riders found for club {}", self.club_id));
            return Ok(());
        }

        let mut riders = limiter
            .execute_with_limit(Endpoint::RiderBulk, || api.riders_bulk(&rider_ids))
            .await?;

        let returned: HashSet<u64> = riders.iter().map(|r| r.rider_id).collect();
        let missing: Vec<u64> = rider_ids
            .iter()
            .copied()
            .filter(|id| !returned.contains(id))
            .collect();
        if !missing.is_empty() {
            debug!(missing = missing.len(), "profiles missing from bulk response");
        }
        for rider_id in missing {
            let fetched = limiter
                .execute_when_allowed(Endpoint::RiderIndividual, || api.rider(rider_id))
                .await;
            match fetched {
                Ok(profile) => riders.push(profile),
                Err(err) => {
                    warn!(rider_id, error = %err, "rider profile fetch failed");
                    metrics.record_failure(format!("rider {rider_id}: {err}"));
                }
            }
        }

        let counts = self
            .ctx
            .store
            .upsert_riders(&riders)
            .await
            .map_err(SyncError::Store)?;
        metrics.created = counts.created;
        metrics.updated = counts.updated;

        info!(
            club_id = self.club_id,
            riders = riders.len(),
            created = counts.created,
            updated = counts.updated,
            "riders synced"
        );
        Ok(())
    }
}

#[async_trait]
impl SyncExecutor for RiderSyncExecutor {
    fn job_type(&self) -> JobType {
        JobType::RiderSync
    }

    async fn execute(&self) -> SyncResult {
        let mut metrics = SyncMetrics::begin(JobType::RiderSync, self.ctx.clock.now());
        let outcome = self.sync(&mut metrics).await;
        self.ctx.conclude(metrics, outcome).await
    }
}
