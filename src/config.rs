// ABOUTME: Layered configuration: built-in defaults, a TOML file, then env vars.
// ABOUTME: Builds the quota table and time-slot table the engine runs with.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::coordinator::{
    Endpoint, JobType, Quota, RateLimiter, SLOT_WIDTH_MINUTES, SlotTable, TimeSlot,
};
use crate::error::ConfigError;
use crate::executor::{DEFAULT_RESULTS_LOOKBACK_HOURS, TEAM_CLUB_ID};

/// Environment prefix; `__` separates nested keys, e.g.
/// `QUOTA_SYNC_RATE_LIMITS__RIDER_BULK__MAX_CALLS=2`.
pub const ENV_PREFIX: &str = "QUOTA_SYNC_";

pub const DEFAULT_BASE_URL: &str = "https://zwift-ranking.herokuapp.com";

/// Top-level config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub rate_limits: RateLimitsConfig,
    pub time_slots: TimeSlotsConfig,
    pub slot_width_minutes: u32,
    pub rider_sync: RiderSyncConfig,
    pub event_sync: EventSyncConfig,
    pub results_sync: ResultsSyncConfig,
    pub batch_sync: BatchSyncConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            time_slots: TimeSlotsConfig::default(),
            slot_width_minutes: SLOT_WIDTH_MINUTES,
            rider_sync: RiderSyncConfig::default(),
            event_sync: EventSyncConfig::default(),
            results_sync: ResultsSyncConfig::default(),
            batch_sync: BatchSyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_calls: u32,
    pub window_secs: u64,
}

impl From<Quota> for QuotaConfig {
    fn from(quota: Quota) -> Self {
        Self {
            max_calls: quota.max_calls,
            window_secs: quota.window.as_secs(),
        }
    }
}

impl From<QuotaConfig> for Quota {
    fn from(config: QuotaConfig) -> Self {
        Quota::new(config.max_calls, Duration::from_secs(config.window_secs))
    }
}

/// Per-endpoint quotas, named after the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub club_members: QuotaConfig,
    pub rider_individual: QuotaConfig,
    pub rider_bulk: QuotaConfig,
    pub event_details: QuotaConfig,
    pub event_signups: QuotaConfig,
    pub event_results: QuotaConfig,
    pub events_upcoming: QuotaConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        let quota = |endpoint: Endpoint| QuotaConfig::from(endpoint.default_quota());
        Self {
            club_members: quota(Endpoint::ClubMembers),
            rider_individual: quota(Endpoint::RiderIndividual),
            rider_bulk: quota(Endpoint::RiderBulk),
            event_details: quota(Endpoint::EventDetails),
            event_signups: quota(Endpoint::EventSignups),
            event_results: quota(Endpoint::EventResults),
            events_upcoming: quota(Endpoint::EventsUpcoming),
        }
    }
}

impl RateLimitsConfig {
    pub fn get(&self, endpoint: Endpoint) -> QuotaConfig {
        match endpoint {
            Endpoint::ClubMembers => self.club_members,
            Endpoint::RiderIndividual => self.rider_individual,
            Endpoint::RiderBulk => self.rider_bulk,
            Endpoint::EventDetails => self.event_details,
            Endpoint::EventSignups => self.event_signups,
            Endpoint::EventResults => self.event_results,
            Endpoint::EventsUpcoming => self.events_upcoming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub interval_minutes: u32,
    pub offset_minutes: u32,
}

impl From<TimeSlot> for SlotConfig {
    fn from(slot: TimeSlot) -> Self {
        Self {
            interval_minutes: slot.interval_minutes,
            offset_minutes: slot.offset_minutes,
        }
    }
}

/// Per-job-type time slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSlotsConfig {
    pub rider_sync: SlotConfig,
    pub near_event_sync: SlotConfig,
    pub far_event_sync: SlotConfig,
    pub combined_event_sync: SlotConfig,
    pub results_sync: SlotConfig,
}

impl Default for TimeSlotsConfig {
    fn default() -> Self {
        let slot = |job: JobType| SlotConfig::from(job.default_slot());
        Self {
            rider_sync: slot(JobType::RiderSync),
            near_event_sync: slot(JobType::NearEventSync),
            far_event_sync: slot(JobType::FarEventSync),
            combined_event_sync: slot(JobType::CombinedEventSync),
            results_sync: slot(JobType::ResultsSync),
        }
    }
}

impl TimeSlotsConfig {
    pub fn get(&self, job: JobType) -> SlotConfig {
        match job {
            JobType::RiderSync => self.rider_sync,
            JobType::NearEventSync => self.near_event_sync,
            JobType::FarEventSync => self.far_event_sync,
            JobType::CombinedEventSync => self.combined_event_sync,
            JobType::ResultsSync => self.results_sync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiderSyncConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub club_id: u64,
}

impl Default for RiderSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 360,
            club_id: TEAM_CLUB_ID,
        }
    }
}

/// Settings of the smart event sync driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSyncConfig {
    pub enabled: bool,
    /// How often the driver looks at upcoming events.
    pub check_interval_minutes: u32,
    /// Events starting within this many minutes are "near".
    pub near_threshold_minutes: u32,
    /// Resync interval of near events.
    pub near_interval_minutes: u32,
    /// Resync interval of far events.
    pub far_interval_minutes: u32,
    pub lookahead_hours: u32,
    /// Queue one combined job per tick instead of separate near and far jobs.
    pub combined: bool,
}

impl Default for EventSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 5,
            near_threshold_minutes: 60,
            near_interval_minutes: 10,
            far_interval_minutes: 60,
            lookahead_hours: 36,
            combined: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSyncConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub lookback_hours: u32,
}

impl Default for ResultsSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
            lookback_hours: DEFAULT_RESULTS_LOOKBACK_HOURS,
        }
    }
}

/// Settings of the integrated riders, events, results batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSyncConfig {
    /// Refuse an unforced batch that follows the last one too closely.
    pub skip_if_recent: bool,
    pub recent_threshold_minutes: u32,
    /// Run one forced batch when the daemon starts.
    pub run_on_startup: bool,
}

impl Default for BatchSyncConfig {
    fn default() -> Self {
        Self {
            skip_if_recent: true,
            recent_threshold_minutes: 30,
            run_on_startup: false,
        }
    }
}

pub(crate) fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}

impl SyncConfig {
    /// Load defaults, then `path` (if given and present), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// The provider stack `load` extracts from.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: SyncConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.slot_width_minutes == 0 || self.slot_width_minutes > 60 {
            return invalid(format!(
                "slot_width_minutes must be in 1..=60, got {}",
                self.slot_width_minutes
            ));
        }

        for endpoint in Endpoint::ALL {
            let quota = self.rate_limits.get(endpoint);
            if quota.max_calls == 0 {
                return invalid(format!("rate_limits.{endpoint}.max_calls must be > 0"));
            }
            if quota.window_secs == 0 {
                return invalid(format!("rate_limits.{endpoint}.window_secs must be > 0"));
            }
        }

        for job in JobType::ALL {
            let slot = self.time_slots.get(job);
            let key = job.as_str().to_lowercase();
            if slot.interval_minutes == 0 {
                return invalid(format!("time_slots.{key}.interval_minutes must be > 0"));
            }
            if slot.offset_minutes >= 60 {
                return invalid(format!(
                    "time_slots.{key}.offset_minutes must be < 60, got {}",
                    slot.offset_minutes
                ));
            }
        }

        let intervals = [
            ("rider_sync.interval_minutes", self.rider_sync.interval_minutes),
            ("event_sync.check_interval_minutes", self.event_sync.check_interval_minutes),
            ("event_sync.near_interval_minutes", self.event_sync.near_interval_minutes),
            ("event_sync.far_interval_minutes", self.event_sync.far_interval_minutes),
            ("event_sync.lookahead_hours", self.event_sync.lookahead_hours),
            ("results_sync.interval_minutes", self.results_sync.interval_minutes),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return invalid(format!("{key} must be > 0"));
            }
        }

        if self.api.timeout_secs == 0 {
            return invalid("api.timeout_secs must be > 0".to_string());
        }
        Ok(())
    }

    /// The configured time-slot table.
    pub fn slot_table(&self) -> SlotTable {
        let slots = JobType::ALL.map(|job| {
            let slot = self.time_slots.get(job);
            (job, TimeSlot::new(slot.interval_minutes, slot.offset_minutes))
        });
        SlotTable::new(slots, self.slot_width_minutes)
    }

    /// A rate limiter over the configured quotas.
    pub fn rate_limiter(&self, clock: Arc<dyn Clock>) -> RateLimiter {
        let quotas = Endpoint::ALL.map(|e| (e, Quota::from(self.rate_limits.get(e))));
        RateLimiter::with_quotas(clock, quotas)
    }
}
