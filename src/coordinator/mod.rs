// ABOUTME: Coordinator module for sharing quota-limited endpoints between sync jobs.
// ABOUTME: Contains the rate limiter, job/time-slot tables, and the priority queue.

mod coordinator;
mod job;
mod rate_limiter;

pub use coordinator::{
    Coordinator, CoordinatorStatus, QueuedRequestStatus, RunCheck, SyncResult, TimeSlotStatus,
};
pub use job::{JobType, SLOT_WIDTH_MINUTES, SlotTable, TimeSlot};
pub use rate_limiter::{Endpoint, EndpointQuota, EndpointStatus, GENEROUS_MAX_CALLS, Quota, RateLimiter};

#[cfg(test)]
mod coordinator_test;
