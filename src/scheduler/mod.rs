// ABOUTME: Timer drivers that decide what is due and feed the coordinator.
// ABOUTME: Shares the recurring timer handle and the tick re-entrancy guard.

mod batch;
mod event_sync;
mod periodic;

pub use batch::{BatchOptions, BatchSync, BatchSyncReport, BatchSyncStatus};
pub use event_sync::{EventTickReport, SmartEventSync};
pub use periodic::{PeriodicScheduler, RiderSyncScheduler};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Marks a tick in flight; clears the flag when dropped, even on panic or
/// cancellation.
pub(crate) struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    /// Claim `flag`, or `None` if a tick already holds it.
    pub(crate) fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the recurring timer task of one driver.
#[derive(Default)]
pub(crate) struct Timer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Start firing `tick` every `period`, the first time immediately.
    /// Each tick is spawned, so a slow tick never delays the next firing.
    /// Returns false if the timer was already running.
    pub(crate) async fn start<F, Fut>(&self, name: &'static str, period: Duration, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(driver = name, "timer already running");
            return false;
        }

        let period = period.max(Duration::from_millis(1));
        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tokio::spawn(tick());
            }
        }));
        info!(driver = name, period_secs = period.as_secs(), "scheduler started");
        true
    }

    /// Stop the timer. A tick already in flight runs to completion.
    pub(crate) async fn stop(&self, name: &'static str) -> bool {
        match self.handle.lock().await.take() {
            Some(handle) => {
                handle.abort();
                info!(driver = name, "scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
