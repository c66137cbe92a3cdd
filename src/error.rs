// ABOUTME: Defines all error types for the quota-sync library using thiserror.
// ABOUTME: Quota, transport, and config errors are unified under SyncError.

use chrono::{DateTime, Utc};

use crate::coordinator::Endpoint;

/// Top-level error type returned by executors and the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("Network error: {0}")]
    Network(#[source] ApiError),

    #[error("Executor failed: {0}")]
    Executor(#[source] anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Coordinator dropped the request before it ran")]
    Dropped,

    #[error("{0} already in progress")]
    AlreadyRunning(String),

    #[error("batch sync ran at {last_sync_at}, next run allowed at {retry_at}")]
    RecentlySynced {
        last_sync_at: DateTime<Utc>,
        retry_at: DateTime<Utc>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Wrap an arbitrary failure unrelated to the network.
    pub fn executor(err: impl Into<anyhow::Error>) -> Self {
        SyncError::Executor(err.into())
    }
}

impl From<ApiError> for SyncError {
    /// Quota denials stay `RateLimited`; everything else is a network failure.
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::RateLimited(exceeded) => SyncError::RateLimited(exceeded),
            other => SyncError::Network(other),
        }
    }
}

/// Raised when an endpoint's quota for the current window is used up.
///
/// Callers must not retry before `reset_at`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for '{endpoint}', resets at {reset_at}")]
pub struct RateLimitExceeded {
    pub endpoint: Endpoint,
    pub reset_at: DateTime<Utc>,
}

/// Errors from the external racing API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}) for {url}")]
    Status { status: u16, url: String },

    #[error("Deserialization error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

impl ApiError {
    /// True when the remote side rejected the call for exceeding its quota.
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, ApiError::Status { status: 429, .. } | ApiError::RateLimited(_))
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
