// ABOUTME: Fixed-window rate limiter keyed by named API endpoint.
// ABOUTME: Gates external calls so each endpoint stays inside its quota.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::RateLimitExceeded;

/// A quota-limited endpoint of the racing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `GET /public/clubs/:id`
    ClubMembers,
    /// `GET /public/riders/:id`
    RiderIndividual,
    /// `POST /public/riders`
    RiderBulk,
    /// `GET /public/events/:id`
    EventDetails,
    /// `GET /api/events/:id/signups`
    EventSignups,
    /// `GET /public/results/:id`
    EventResults,
    /// `GET /api/events/upcoming`
    EventsUpcoming,
}

impl Endpoint {
    /// Every endpoint, in status-report order.
    pub const ALL: [Endpoint; 7] = [
        Endpoint::ClubMembers,
        Endpoint::RiderIndividual,
        Endpoint::RiderBulk,
        Endpoint::EventDetails,
        Endpoint::EventSignups,
        Endpoint::EventResults,
        Endpoint::EventsUpcoming,
    ];

    /// The endpoint's quota name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::ClubMembers => "club_members",
            Endpoint::RiderIndividual => "rider_individual",
            Endpoint::RiderBulk => "rider_bulk",
            Endpoint::EventDetails => "event_details",
            Endpoint::EventSignups => "event_signups",
            Endpoint::EventResults => "event_results",
            Endpoint::EventsUpcoming => "events_upcoming",
        }
    }

    /// Standard API tier quota for this endpoint.
    pub fn default_quota(&self) -> Quota {
        match self {
            Endpoint::ClubMembers => Quota::new(1, Duration::from_secs(60 * 60)),
            Endpoint::RiderIndividual => Quota::new(5, Duration::from_secs(60)),
            Endpoint::RiderBulk => Quota::new(1, Duration::from_secs(15 * 60)),
            Endpoint::EventSignups | Endpoint::EventResults => {
                Quota::new(1, Duration::from_secs(60))
            }
            // Not throttled upstream; still counted so status reports show usage.
            Endpoint::EventDetails | Endpoint::EventsUpcoming => {
                Quota::new(GENEROUS_MAX_CALLS, Duration::from_secs(60))
            }
        }
    }
}

/// Calls per minute allowed on endpoints the API does not throttle.
pub const GENEROUS_MAX_CALLS: u32 = 1000;

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown endpoint: {s}"))
    }
}

/// Static quota: at most `max_calls` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_calls: u32,
    pub window: Duration,
}

impl Quota {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }
}

/// Usage state of one endpoint's fixed window.
///
/// Fields are private: the only way to change the counter is through
/// [`RateLimiter`], which calls [`EndpointQuota::roll`] before every decision.
#[derive(Debug, Clone)]
pub struct EndpointQuota {
    max_calls: u32,
    window: chrono::Duration,
    window_start: DateTime<Utc>,
    call_count: u32,
}

impl EndpointQuota {
    fn new(quota: Quota, now: DateTime<Utc>) -> Self {
        Self {
            max_calls: quota.max_calls,
            window: chrono::Duration::from_std(quota.window).unwrap_or(chrono::Duration::MAX),
            window_start: now,
            call_count: 0,
        }
    }

    /// Start a fresh window if the current one has expired.
    fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.window_start >= self.window {
            self.reset(now);
        }
    }

    /// Drop all usage and open a new window at `now`.
    fn reset(&mut self, now: DateTime<Utc>) {
        self.window_start = now;
        self.call_count = 0;
    }

    fn is_exhausted(&self) -> bool {
        self.call_count >= self.max_calls
    }

    fn remaining(&self) -> u32 {
        self.max_calls.saturating_sub(self.call_count)
    }

    fn reset_at(&self) -> DateTime<Utc> {
        self.window_start + self.window
    }

    /// Count one call, or refuse if the window is used up.
    fn try_acquire(
        &mut self,
        endpoint: Endpoint,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitExceeded> {
        self.roll(now);
        if self.is_exhausted() {
            return Err(RateLimitExceeded {
                endpoint,
                reset_at: self.reset_at(),
            });
        }
        // An idle window is anchored at its first call.
        if self.call_count == 0 {
            self.window_start = now;
        }
        self.call_count += 1;
        Ok(())
    }
}

/// Diagnostic snapshot of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub can_call: bool,
    pub remaining: u32,
    pub calls_in_window: u32,
    pub max_calls: u32,
    /// End of the current window, `None` while no call has been made in it.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Fixed-window rate limiter for the racing API.
///
/// Each endpoint owns an independent window; windows never interact. The
/// limiter is shared (via `Arc`) by the coordinator, which checks it, and the
/// executors, which spend quota through [`RateLimiter::execute_with_limit`].
pub struct RateLimiter {
    quotas: Mutex<HashMap<Endpoint, EndpointQuota>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter with the standard quota table.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_quotas(clock, Endpoint::ALL.map(|e| (e, e.default_quota())))
    }

    /// Create a limiter with explicit quotas. Endpoints left out keep their
    /// standard quota.
    pub fn with_quotas(
        clock: Arc<dyn Clock>,
        quotas: impl IntoIterator<Item = (Endpoint, Quota)>,
    ) -> Self {
        let now = clock.now();
        let mut table: HashMap<Endpoint, EndpointQuota> = Endpoint::ALL
            .into_iter()
            .map(|e| (e, EndpointQuota::new(e.default_quota(), now)))
            .collect();
        for (endpoint, quota) in quotas {
            table.insert(endpoint, EndpointQuota::new(quota, now));
        }

        Self {
            quotas: Mutex::new(table),
            clock,
        }
    }

    /// Whether a call to `endpoint` would be allowed right now.
    ///
    /// Read-only check: it may roll an expired window forward but never
    /// counts a call.
    pub async fn is_within_limit(&self, endpoint: Endpoint) -> bool {
        let now = self.clock.now();
        let mut quotas = self.quotas.lock().await;
        let quota = Self::quota_mut(&mut quotas, endpoint, now);
        quota.roll(now);
        !quota.is_exhausted()
    }

    /// Run `call` if `endpoint` has quota left, counting it against the window.
    ///
    /// Fails with [`RateLimitExceeded`] without invoking `call` when the
    /// window is used up. A call that fails still consumed its unit of quota,
    /// since the request went out; its error is returned unchanged.
    pub async fn execute_with_limit<T, E, F, Fut>(&self, endpoint: Endpoint, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RateLimitExceeded>,
    {
        if let Err(exceeded) = self.try_acquire(endpoint).await {
            warn!(%endpoint, reset_at = %exceeded.reset_at, "rate limit exceeded");
            return Err(exceeded.into());
        }
        call().await
    }

    /// Like [`execute_with_limit`](Self::execute_with_limit), but waits for
    /// the window to reset instead of failing.
    pub async fn execute_when_allowed<T, E, F, Fut>(
        &self,
        endpoint: Endpoint,
        call: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            match self.try_acquire(endpoint).await {
                Ok(()) => return call().await,
                Err(exceeded) => {
                    let wait = self.get_wait_time(endpoint).await;
                    debug!(
                        %endpoint,
                        reset_at = %exceeded.reset_at,
                        wait_secs = wait.as_secs(),
                        "waiting for rate limit window"
                    );
                    self.clock.sleep(wait).await;
                }
            }
        }
    }

    /// How long until `endpoint` accepts another call; zero if it does now.
    pub async fn get_wait_time(&self, endpoint: Endpoint) -> Duration {
        let now = self.clock.now();
        let mut quotas = self.quotas.lock().await;
        let quota = Self::quota_mut(&mut quotas, endpoint, now);
        quota.roll(now);
        if !quota.is_exhausted() {
            return Duration::ZERO;
        }
        (quota.reset_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Snapshot of every endpoint's window.
    pub async fn get_status(&self) -> BTreeMap<Endpoint, EndpointStatus> {
        let now = self.clock.now();
        let mut quotas = self.quotas.lock().await;
        Endpoint::ALL
            .into_iter()
            .map(|endpoint| {
                let quota = Self::quota_mut(&mut quotas, endpoint, now);
                quota.roll(now);
                let status = EndpointStatus {
                    can_call: !quota.is_exhausted(),
                    remaining: quota.remaining(),
                    calls_in_window: quota.call_count,
                    max_calls: quota.max_calls,
                    reset_at: (quota.call_count > 0).then(|| quota.reset_at()),
                };
                (endpoint, status)
            })
            .collect()
    }

    /// Clear every window.
    pub async fn reset(&self) {
        let now = self.clock.now();
        let mut quotas = self.quotas.lock().await;
        for quota in quotas.values_mut() {
            quota.reset(now);
        }
    }

    async fn try_acquire(&self, endpoint: Endpoint) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let mut quotas = self.quotas.lock().await;
        Self::quota_mut(&mut quotas, endpoint, now).try_acquire(endpoint, now)
    }

    fn quota_mut(
        quotas: &mut HashMap<Endpoint, EndpointQuota>,
        endpoint: Endpoint,
        now: DateTime<Utc>,
    ) -> &mut EndpointQuota {
        quotas
            .entry(endpoint)
            .or_insert_with(|| EndpointQuota::new(endpoint.default_quota(), now))
    }
}
