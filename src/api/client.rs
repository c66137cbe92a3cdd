// ABOUTME: Defines the RacingApi trait - the abstraction executors and drivers
// ABOUTME: call through, so the engine never depends on a concrete transport.

use async_trait::async_trait;

use super::{ClubRoster, EventResult, EventSignup, RiderProfile, UpcomingEvent};
use crate::error::ApiError;

/// One method per consumed endpoint.
///
/// Implementations perform exactly one external request per call. Quota
/// accounting is done by the caller through the rate limiter, never here.
#[async_trait]
pub trait RacingApi: Send + Sync {
    /// Club roster (`club_members` quota).
    async fn club_members(&self, club_id: u64) -> Result<ClubRoster, ApiError>;

    /// Profiles for many riders in one request (`rider_bulk` quota).
    async fn riders_bulk(&self, rider_ids: &[u64]) -> Result<Vec<RiderProfile>, ApiError>;

    /// A single rider profile (`rider_individual` quota).
    async fn rider(&self, rider_id: u64) -> Result<RiderProfile, ApiError>;

    /// Events starting within the next `hours` (`events_upcoming` quota).
    async fn upcoming_events(&self, hours: u32) -> Result<Vec<UpcomingEvent>, ApiError>;

    /// Signups for one event (`event_signups` quota).
    async fn event_signups(&self, event_id: u64) -> Result<Vec<EventSignup>, ApiError>;

    /// Results for one finished event (`event_results` quota).
    async fn event_results(&self, event_id: u64) -> Result<Vec<EventResult>, ApiError>;
}
