// ABOUTME: Job types with their static priority, endpoint dependencies, and time slots.
// ABOUTME: Time slots stagger job families so their quotas never collide.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::rate_limiter::Endpoint;

/// Width of every job type's recurring window of opportunity.
pub const SLOT_WIDTH_MINUTES: u32 = 5;

/// A periodic sync family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Team roster and rider profiles.
    RiderSync,
    /// Signups for events starting soon.
    NearEventSync,
    /// Signups for events further out.
    FarEventSync,
    /// Near and far signups in one pass.
    CombinedEventSync,
    /// Race results of recently finished events.
    ResultsSync,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::RiderSync,
        JobType::NearEventSync,
        JobType::FarEventSync,
        JobType::CombinedEventSync,
        JobType::ResultsSync,
    ];

    /// Queue priority; lower runs first.
    ///
    /// Roster data outranks event signups, which outrank the low-frequency
    /// families. Tests depend on this exact table.
    pub fn priority(&self) -> u8 {
        match self {
            JobType::RiderSync => 1,
            JobType::NearEventSync => 2,
            JobType::CombinedEventSync => 2,
            JobType::FarEventSync => 3,
            JobType::ResultsSync => 4,
        }
    }

    /// Endpoints whose quota this job spends, in the order they are checked.
    pub fn endpoints(&self) -> &'static [Endpoint] {
        match self {
            JobType::RiderSync => &[Endpoint::ClubMembers, Endpoint::RiderBulk],
            JobType::NearEventSync | JobType::FarEventSync | JobType::CombinedEventSync => {
                &[Endpoint::EventsUpcoming, Endpoint::EventSignups]
            }
            JobType::ResultsSync => &[Endpoint::EventResults],
        }
    }

    /// Default recurring slot.
    pub fn default_slot(&self) -> TimeSlot {
        match self {
            // every 6h at :00
            JobType::RiderSync => TimeSlot::new(360, 0),
            // :05, :20, :35, :50
            JobType::NearEventSync => TimeSlot::new(15, 5),
            // every 2h at :30
            JobType::FarEventSync => TimeSlot::new(120, 30),
            // :10, :40
            JobType::CombinedEventSync => TimeSlot::new(30, 10),
            // :45
            JobType::ResultsSync => TimeSlot::new(60, 45),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::RiderSync => "RIDER_SYNC",
            JobType::NearEventSync => "NEAR_EVENT_SYNC",
            JobType::FarEventSync => "FAR_EVENT_SYNC",
            JobType::CombinedEventSync => "COMBINED_EVENT_SYNC",
            JobType::ResultsSync => "RESULTS_SYNC",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring window: opens every `interval_minutes`, shifted by
/// `offset_minutes`, measured on the minute of the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub interval_minutes: u32,
    pub offset_minutes: u32,
}

impl TimeSlot {
    pub const fn new(interval_minutes: u32, offset_minutes: u32) -> Self {
        Self {
            interval_minutes,
            offset_minutes,
        }
    }

    /// Whether the window is open at `minute` (0..60) of the hour.
    pub fn is_open(&self, minute: u32, width: u32) -> bool {
        let since_offset = (minute + 60 - self.offset_minutes % 60) % 60;
        since_offset % self.interval_minutes.max(1) < width
    }

    /// Whether the window is open at `at`.
    pub fn is_open_at(&self, at: DateTime<Utc>, width: u32) -> bool {
        self.is_open(at.minute(), width)
    }

    /// The next instant the window is open: `now` itself if it already is,
    /// otherwise the start of the first open minute after it.
    ///
    /// Returns `None` only for a zero width, which never opens.
    pub fn next_open(&self, now: DateTime<Utc>, width: u32) -> Option<DateTime<Utc>> {
        if self.is_open_at(now, width) {
            return Some(now);
        }
        let minute_start = now
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(now);
        // The pattern repeats every hour, so one hour of lookahead suffices.
        (1..=60)
            .map(|m| minute_start + chrono::Duration::minutes(m))
            .find(|candidate| self.is_open_at(*candidate, width))
    }
}

/// Time slot assignment for every job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: BTreeMap<JobType, TimeSlot>,
    width_minutes: u32,
}

impl SlotTable {
    /// Slots with explicit overrides; job types left out use their default.
    pub fn new(
        overrides: impl IntoIterator<Item = (JobType, TimeSlot)>,
        width_minutes: u32,
    ) -> Self {
        let mut slots: BTreeMap<_, _> = JobType::ALL
            .into_iter()
            .map(|job| (job, job.default_slot()))
            .collect();
        slots.extend(overrides);
        Self {
            slots,
            width_minutes,
        }
    }

    /// A table whose windows are always open; for manual and test setups.
    pub fn always_open() -> Self {
        Self::new(
            JobType::ALL.map(|job| (job, TimeSlot::new(1, 0))),
            SLOT_WIDTH_MINUTES,
        )
    }

    pub fn slot(&self, job: JobType) -> TimeSlot {
        self.slots
            .get(&job)
            .copied()
            .unwrap_or_else(|| job.default_slot())
    }

    pub fn width_minutes(&self) -> u32 {
        self.width_minutes
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobType, TimeSlot)> + '_ {
        self.slots.iter().map(|(job, slot)| (*job, *slot))
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new([], SLOT_WIDTH_MINUTES)
    }
}
