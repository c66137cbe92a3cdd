// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use quota_sync::prelude::*;` to get started quickly.

pub use crate::api::{
    ClubMember, ClubRoster, EventResult, EventSignup, HttpRacingApi, RacingApi, RiderProfile,
    UpcomingEvent,
};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{BatchSyncConfig, SyncConfig};
pub use crate::coordinator::{
    Coordinator, CoordinatorStatus, Endpoint, EndpointStatus, JobType, Quota, RateLimiter,
    RunCheck, SlotTable, SyncResult, TimeSlot,
};
pub use crate::error::{ApiError, ConfigError, RateLimitExceeded, SyncError};
pub use crate::executor::{
    EventSyncExecutor, ResultsSyncExecutor, RiderSyncExecutor, SyncContext, SyncExecutor,
};
pub use crate::metrics::{ManualSyncOutcome, SyncMetrics, SyncStatus};
pub use crate::scheduler::{
    BatchOptions, BatchSync, BatchSyncReport, BatchSyncStatus, EventTickReport, PeriodicScheduler,
    RiderSyncScheduler, SmartEventSync,
};
pub use crate::store::{MemoryStore, SyncStore, UpsertCounts};
