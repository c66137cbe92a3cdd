// ABOUTME: Shared fakes for unit tests: a scripted RacingApi and a wired context.
// ABOUTME: Compiled only under cfg(test).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::api::{
    ClubMember, ClubRoster, EventResult, EventSignup, RacingApi, RiderProfile, UpcomingEvent,
};
use crate::clock::{Clock, ManualClock};
use crate::coordinator::RateLimiter;
use crate::error::ApiError;
use crate::executor::SyncContext;
use crate::store::MemoryStore;

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, minute, 0).unwrap()
}

pub fn event(id: u64, start: DateTime<Utc>) -> UpcomingEvent {
    UpcomingEvent {
        id,
        title: format!("Event {id}"),
        start,
    }
}

/// Scripted racing API that records every call it receives.
#[derive(Default)]
pub struct FakeApi {
    pub roster: Mutex<Vec<u64>>,
    pub upcoming: Mutex<Vec<UpcomingEvent>>,
    pub results: Mutex<HashMap<u64, Vec<EventResult>>>,
    pub failing_events: Mutex<HashSet<u64>>,
    pub fail_roster: Mutex<bool>,
    pub fail_upcoming: Mutex<bool>,
    /// Riders left out of bulk responses.
    pub bulk_gaps: Mutex<HashSet<u64>>,
    /// Riders the single-profile endpoint reports as unknown.
    pub unknown_riders: Mutex<HashSet<u64>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn with_roster(ids: &[u64]) -> Self {
        let api = Self::default();
        *api.roster.lock().unwrap() = ids.to_vec();
        api
    }

    pub fn set_upcoming(&self, events: Vec<UpcomingEvent>) {
        *self.upcoming.lock().unwrap() = events;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn unavailable(url: &str) -> ApiError {
        ApiError::Status {
            status: 503,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl RacingApi for FakeApi {
    async fn club_members(&self, club_id: u64) -> Result<ClubRoster, ApiError> {
        self.record(format!("club_members:{club_id}"));
        if *self.fail_roster.lock().unwrap() {
            return Err(Self::unavailable("/public/clubs"));
        }
        let riders = self
            .roster
            .lock()
            .unwrap()
            .iter()
            .map(|id| ClubMember {
                rider_id: *id,
                name: format!("Rider {id}"),
            })
            .collect();
        Ok(ClubRoster {
            club_id,
            name: "Team".to_string(),
            riders,
        })
    }

    async fn riders_bulk(&self, rider_ids: &[u64]) -> Result<Vec<RiderProfile>, ApiError> {
        self.record(format!("riders_bulk:{}", rider_ids.len()));
        let gaps = self.bulk_gaps.lock().unwrap().clone();
        Ok(rider_ids
            .iter()
            .filter(|id| !gaps.contains(id))
            .map(|id| RiderProfile {
                rider_id: *id,
                name: format!("Rider {id}"),
                country: Some("nl".to_string()),
                category: Some("B".to_string()),
                ftp: Some(250.0),
                weight: Some(70.0),
            })
            .collect())
    }

    async fn rider(&self, rider_id: u64) -> Result<RiderProfile, ApiError> {
        self.record(format!("rider:{rider_id}"));
        if self.unknown_riders.lock().unwrap().contains(&rider_id) {
            return Err(ApiError::Status {
                status: 404,
                url: format!("/public/riders/{rider_id}"),
            });
        }
        Ok(RiderProfile {
            rider_id,
            name: format!("Rider {rider_id}"),
            country: None,
            category: None,
            ftp: None,
            weight: None,
        })
    }

    async fn upcoming_events(&self, hours: u32) -> Result<Vec<UpcomingEvent>, ApiError> {
        self.record(format!("upcoming_events:{hours}"));
        if *self.fail_upcoming.lock().unwrap() {
            return Err(Self::unavailable("/api/events/upcoming"));
        }
        Ok(self.upcoming.lock().unwrap().clone())
    }

    async fn event_signups(&self, event_id: u64) -> Result<Vec<EventSignup>, ApiError> {
        self.record(format!("event_signups:{event_id}"));
        if self.failing_events.lock().unwrap().contains(&event_id) {
            return Err(Self::unavailable("/api/events/signups"));
        }
        Ok(vec![
            EventSignup {
                rider_id: 1,
                name: "Rider 1".to_string(),
                category: Some("B".to_string()),
            },
            EventSignup {
                rider_id: 2,
                name: "Rider 2".to_string(),
                category: Some("C".to_string()),
            },
        ])
    }

    async fn event_results(&self, event_id: u64) -> Result<Vec<EventResult>, ApiError> {
        self.record(format!("event_results:{event_id}"));
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(&event_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A context over a fake API, a memory store, and a manual clock.
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub limiter: Arc<RateLimiter>,
    pub clock: ManualClock,
    pub ctx: SyncContext,
}

impl Harness {
    pub fn new(api: FakeApi, start: DateTime<Utc>) -> Self {
        let api = Arc::new(api);
        let store = MemoryStore::shared();
        let clock = ManualClock::new(start);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let limiter = Arc::new(RateLimiter::new(shared_clock.clone()));
        let ctx = SyncContext::new(api.clone(), store.clone(), limiter.clone(), shared_clock);
        Self {
            api,
            store,
            limiter,
            clock,
            ctx,
        }
    }

    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }
}
