// ABOUTME: Persistence boundary for synced snapshots and sync metrics.
// ABOUTME: Defines the SyncStore trait and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::api::{EventResult, EventSignup, RiderProfile, UpcomingEvent};
use crate::metrics::SyncMetrics;

/// How many rows an upsert inserted versus replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub created: u32,
    pub updated: u32,
}

/// Trait for persisting what the sync executors fetch.
///
/// Implement this trait to back the engine with a real database. Every
/// executor run ends with one [`record_metrics`](SyncStore::record_metrics)
/// call, whether it succeeded or not.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert or replace rider profiles, keyed by rider id.
    async fn upsert_riders(&self, riders: &[RiderProfile]) -> Result<UpsertCounts, anyhow::Error>;

    /// Remember events whose signups are being tracked.
    async fn save_events(&self, events: &[UpcomingEvent]) -> Result<(), anyhow::Error>;

    /// Ids of saved events that started in `[from, to]` and have no results yet.
    async fn events_awaiting_results(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<u64>, anyhow::Error>;

    /// Replace the signup snapshot of one event.
    async fn save_signups(&self, event_id: u64, signups: &[EventSignup])
    -> Result<(), anyhow::Error>;

    /// Replace the result snapshot of one event.
    async fn save_results(&self, event_id: u64, results: &[EventResult])
    -> Result<(), anyhow::Error>;

    /// Append a finished run's metrics.
    async fn record_metrics(&self, metrics: &SyncMetrics) -> Result<(), anyhow::Error>;
}

/// In-memory sync store.
///
/// Useful for tests and for running the daemon without a database.
pub struct MemoryStore {
    riders: RwLock<HashMap<u64, RiderProfile>>,
    events: RwLock<HashMap<u64, UpcomingEvent>>,
    signups: RwLock<HashMap<u64, Vec<EventSignup>>>,
    results: RwLock<HashMap<u64, Vec<EventResult>>>,
    metrics: RwLock<Vec<SyncMetrics>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            riders: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            signups: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            metrics: RwLock::new(Vec::new()),
        }
    }

    /// Create a new store wrapped in Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn rider(&self, rider_id: u64) -> Option<RiderProfile> {
        self.riders.read().await.get(&rider_id).cloned()
    }

    pub async fn rider_count(&self) -> usize {
        self.riders.read().await.len()
    }

    pub async fn event(&self, event_id: u64) -> Option<UpcomingEvent> {
        self.events.read().await.get(&event_id).cloned()
    }

    pub async fn signups(&self, event_id: u64) -> Option<Vec<EventSignup>> {
        self.signups.read().await.get(&event_id).cloned()
    }

    pub async fn results(&self, event_id: u64) -> Option<Vec<EventResult>> {
        self.results.read().await.get(&event_id).cloned()
    }

    /// Every recorded run, oldest first.
    pub async fn metrics(&self) -> Vec<SyncMetrics> {
        self.metrics.read().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn upsert_riders(&self, riders: &[RiderProfile]) -> Result<UpsertCounts, anyhow::Error> {
        let mut stored = self.riders.write().await;
        let mut counts = UpsertCounts::default();
        for rider in riders {
            match stored.insert(rider.rider_id, rider.clone()) {
                Some(_) => counts.updated += 1,
                None => counts.created += 1,
            }
        }
        Ok(counts)
    }

    async fn save_events(&self, events: &[UpcomingEvent]) -> Result<(), anyhow::Error> {
        let mut stored = self.events.write().await;
        for event in events {
            stored.insert(event.id, event.clone());
        }
        Ok(())
    }

    async fn events_awaiting_results(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<u64>, anyhow::Error> {
        let events = self.events.read().await;
        let results = self.results.read().await;
        let mut ids: Vec<u64> = events
            .values()
            .filter(|e| e.start >= from && e.start <= to && !results.contains_key(&e.id))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn save_signups(
        &self,
        event_id: u64,
        signups: &[EventSignup],
    ) -> Result<(), anyhow::Error> {
        self.signups
            .write()
            .await
            .insert(event_id, signups.to_vec());
        Ok(())
    }

    async fn save_results(
        &self,
        event_id: u64,
        results: &[EventResult],
    ) -> Result<(), anyhow::Error> {
        self.results
            .write()
            .await
            .insert(event_id, results.to_vec());
        Ok(())
    }

    async fn record_metrics(&self, metrics: &SyncMetrics) -> Result<(), anyhow::Error> {
        self.metrics.write().await.push(metrics.clone());
        Ok(())
    }
}
