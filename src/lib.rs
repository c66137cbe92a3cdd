// ABOUTME: Root module for quota-sync - rate-limited sync coordination.
// ABOUTME: Re-exports all public types from submodules.

pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod prelude;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::SyncError;
