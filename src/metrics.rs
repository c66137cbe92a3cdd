// ABOUTME: SyncMetrics value object produced by every executor run.
// ABOUTME: Also defines the non-throwing outcome returned by manual triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::{JobType, SyncResult};

/// Overall outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    /// Ran to the end but some items failed or nothing was found.
    Partial,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Partial => write!(f, "partial"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Counters and timing for one executor run.
///
/// Created with [`SyncMetrics::begin`] when an executor starts and sealed
/// with [`finish`](SyncMetrics::finish) or [`fail`](SyncMetrics::fail)
/// before being handed to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub job_type: JobType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
    pub duration_ms: u64,
    pub status: SyncStatus,
    pub detail: String,
}

impl SyncMetrics {
    /// Start metrics for a run of `job_type` beginning at `now`.
    pub fn begin(job_type: JobType, now: DateTime<Utc>) -> Self {
        Self {
            job_type,
            started_at: now,
            finished_at: None,
            processed: 0,
            created: 0,
            updated: 0,
            failed: 0,
            duration_ms: 0,
            status: SyncStatus::Success,
            detail: String::new(),
        }
    }

    /// Count one failed item and note why.
    pub fn record_failure(&mut self, detail: impl AsRef<str>) {
        self.failed += 1;
        self.push_detail(detail.as_ref());
    }

    /// Flag the run as partial without counting a failed item.
    pub fn mark_partial(&mut self, detail: impl AsRef<str>) {
        if self.status == SyncStatus::Success {
            self.status = SyncStatus::Partial;
        }
        self.push_detail(detail.as_ref());
    }

    /// Append free-text detail.
    pub fn push_detail(&mut self, detail: &str) {
        if detail.is_empty() {
            return;
        }
        if !self.detail.is_empty() {
            self.detail.push_str(" | ");
        }
        self.detail.push_str(detail);
    }

    /// Seal a run that reached its end.
    pub fn finish(mut self, now: DateTime<Utc>) -> Self {
        if self.status == SyncStatus::Success && self.failed > 0 {
            self.status = SyncStatus::Partial;
        }
        self.seal(now);
        self
    }

    /// Seal a run that aborted with `error`.
    pub fn fail(mut self, now: DateTime<Utc>, error: &dyn std::fmt::Display) -> Self {
        self.status = SyncStatus::Error;
        self.push_detail(&error.to_string());
        self.seal(now);
        self
    }

    fn seal(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }
}

/// Outcome of a manually triggered sync, reported instead of an error so an
/// admin surface can display it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualSyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SyncMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ManualSyncOutcome {
    /// A refusal that never reached an executor.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            metrics: None,
            error: Some(reason.into()),
        }
    }
}

impl From<SyncResult> for ManualSyncOutcome {
    fn from(result: SyncResult) -> Self {
        match result {
            Ok(metrics) => Self {
                success: metrics.status != SyncStatus::Error,
                metrics: Some(metrics),
                error: None,
            },
            Err(err) => Self::refused(err.to_string()),
        }
    }
}
