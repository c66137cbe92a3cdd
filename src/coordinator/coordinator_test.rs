// ABOUTME: Tests for the sync coordinator queue semantics.
// ABOUTME: Covers priority order, time slots, quota waits, single-flight, and results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use super::coordinator::Coordinator;
use super::job::{JobType, SlotTable};
use super::rate_limiter::{Endpoint, RateLimiter};
use crate::clock::{Clock, ManualClock};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, minute, 0).unwrap()
}

struct Fixture {
    coordinator: Coordinator,
    limiter: Arc<RateLimiter>,
    clock: ManualClock,
}

fn fixture(start: DateTime<Utc>, slots: SlotTable) -> Fixture {
    let clock = ManualClock::new(start);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let limiter = Arc::new(RateLimiter::new(shared.clone()));
    let coordinator = Coordinator::new(limiter.clone(), shared, slots);
    Fixture {
        coordinator,
        limiter,
        clock,
    }
}

fn open_fixture() -> Fixture {
    fixture(at(10, 0), SlotTable::always_open())
}

fn metrics(job: JobType, processed: u32) -> SyncMetrics {
    let mut metrics = SyncMetrics::begin(job, at(10, 0));
    metrics.processed = processed;
    metrics.finish(at(10, 0))
}

/// Queue `jobs` while paused, then resume and collect the execution order.
async fn run_in_order(coordinator: &Coordinator, jobs: &[JobType]) -> Vec<JobType> {
    let order = Arc::new(Mutex::new(Vec::new()));
    coordinator.pause().await;

    let mut handles = Vec::new();
    for job in jobs.iter().copied() {
        let queued = coordinator.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            queued
                .queue_sync(job, move || async move {
                    order.lock().unwrap().push(job);
                    Ok(metrics(job, 1))
                })
                .await
        }));
        // Keep enqueue order deterministic
        while coordinator.queue_length().await < handles.len() {
            tokio::task::yield_now().await;
        }
    }

    coordinator.resume().await;
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let order = order.lock().unwrap().clone();
    order
}

#[tokio::test]
async fn test_drains_by_priority() {
    let f = open_fixture();
    let order = run_in_order(
        &f.coordinator,
        &[
            JobType::FarEventSync,
            JobType::RiderSync,
            JobType::CombinedEventSync,
        ],
    )
    .await;

    assert_eq!(
        order,
        vec![
            JobType::RiderSync,
            JobType::CombinedEventSync,
            JobType::FarEventSync
        ]
    );
}

#[tokio::test]
async fn test_same_priority_is_fifo() {
    let f = open_fixture();
    let order = Arc::new(Mutex::new(Vec::new()));
    f.coordinator.pause().await;

    let mut handles = Vec::new();
    for (i, job) in [
        JobType::CombinedEventSync,
        JobType::NearEventSync,
        JobType::CombinedEventSync,
    ]
    .into_iter()
    .enumerate()
    {
        let coordinator = f.coordinator.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .queue_sync(job, move || async move {
                    order.lock().unwrap().push(i);
                    Ok(metrics(job, 1))
                })
                .await
        }));
        while f.coordinator.queue_length().await < handles.len() {
            tokio::task::yield_now().await;
        }
        // Distinct enqueue times
        f.clock.advance(Duration::from_secs(1));
    }

    f.coordinator.resume().await;
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_each_caller_gets_own_result() {
    let f = open_fixture();

    let first = {
        let coordinator = f.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(JobType::RiderSync, || async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(metrics(JobType::RiderSync, 11))
                })
                .await
        })
    };
    let second = {
        let coordinator = f.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(JobType::RiderSync, || async {
                    Ok(metrics(JobType::RiderSync, 22))
                })
                .await
        })
    };

    assert_eq!(first.await.unwrap().unwrap().processed, 11);
    assert_eq!(second.await.unwrap().unwrap().processed, 22);
    assert_eq!(f.coordinator.queue_length().await, 0);
}

#[tokio::test]
async fn test_failure_reaches_caller_without_requeue() {
    let f = open_fixture();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = f
        .coordinator
        .queue_sync(JobType::ResultsSync, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::executor(anyhow::anyhow!("malformed results")))
        })
        .await;

    match result {
        Err(SyncError::Executor(err)) => assert!(err.to_string().contains("malformed")),
        other => panic!("Expected Executor error, got {:?}", other),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(f.coordinator.queue_length().await, 0);

    // The queue keeps working afterwards
    let ok = f
        .coordinator
        .queue_sync(JobType::RiderSync, || async {
            Ok(metrics(JobType::RiderSync, 1))
        })
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_executor_panic_becomes_error() {
    let f = open_fixture();

    let result = f
        .coordinator
        .queue_sync(JobType::RiderSync, || async {
            let roster: Vec<u32> = Vec::new();
            if roster.is_empty() {
                panic!("bad data");
            }
            Ok(metrics(JobType::RiderSync, roster.len() as u32))
        })
        .await;
    assert!(matches!(result, Err(SyncError::Executor(_))));

    let status = f.coordinator.get_status().await;
    assert_eq!(status.current_job_type, None);
    assert_eq!(status.queue_length, 0);
}

#[tokio::test]
async fn test_waits_for_time_slot() {
    // Near event sync opens at :05, :20, :35, :50
    let f = fixture(at(10, 11), SlotTable::default());
    assert!(!f.coordinator.can_run_now(JobType::NearEventSync));
    assert_eq!(f.coordinator.get_next_slot(JobType::NearEventSync), at(10, 20));

    let clock = f.clock.clone();
    let started = f
        .coordinator
        .queue_sync(JobType::NearEventSync, move || async move {
            Ok(SyncMetrics::begin(JobType::NearEventSync, clock.now()))
        })
        .await
        .unwrap()
        .started_at;

    assert_eq!(started, at(10, 20));
}

#[tokio::test]
async fn test_can_run_now_follows_slot() {
    let f = fixture(at(10, 0), SlotTable::default());

    for (minute, expected) in [(4, false), (5, true), (9, true), (10, false), (20, true), (54, true), (55, false)] {
        f.clock.set(at(10, minute));
        assert_eq!(
            f.coordinator.can_run_now(JobType::NearEventSync),
            expected,
            "minute {minute}"
        );
    }
}

#[tokio::test]
async fn test_can_sync_run_reports_first_blocked_endpoint() {
    let f = open_fixture();

    let check = f.coordinator.can_sync_run(JobType::RiderSync).await;
    assert!(check.can_run);
    assert_eq!(check.blocked_by, None);

    f.limiter
        .execute_with_limit(Endpoint::RiderBulk, || async { Ok::<_, SyncError>(()) })
        .await
        .unwrap();
    let check = f.coordinator.can_sync_run(JobType::RiderSync).await;
    assert!(!check.can_run);
    assert_eq!(check.blocked_by, Some(Endpoint::RiderBulk));

    f.limiter
        .execute_with_limit(Endpoint::ClubMembers, || async { Ok::<_, SyncError>(()) })
        .await
        .unwrap();
    let check = f.coordinator.can_sync_run(JobType::RiderSync).await;
    assert_eq!(check.blocked_by, Some(Endpoint::ClubMembers));

    // Event jobs do not depend on roster endpoints
    assert!(f.coordinator.can_sync_run(JobType::NearEventSync).await.can_run);
}

#[tokio::test]
async fn test_rate_limit_wait_keeps_every_request() {
    let f = open_fixture();
    f.limiter
        .execute_with_limit(Endpoint::ClubMembers, || async { Ok::<_, SyncError>(()) })
        .await
        .unwrap();

    let order = run_in_order(
        &f.coordinator,
        &[
            JobType::RiderSync,
            JobType::FarEventSync,
            JobType::NearEventSync,
            JobType::RiderSync,
            JobType::ResultsSync,
        ],
    )
    .await;

    // Waited out the club_members window before the first rider sync
    assert!(f.clock.now() >= at(11, 0));
    assert_eq!(
        order,
        vec![
            JobType::RiderSync,
            JobType::RiderSync,
            JobType::NearEventSync,
            JobType::FarEventSync,
            JobType::ResultsSync,
        ]
    );
    assert_eq!(f.coordinator.queue_length().await, 0);
}

#[tokio::test]
async fn test_force_sync_bypasses_time_slot() {
    // Rider sync only opens at :00-:04
    let f = fixture(at(10, 30), SlotTable::default());
    assert!(!f.coordinator.can_run_now(JobType::RiderSync));

    let coordinator = f.coordinator.clone();
    let result = f
        .coordinator
        .force_sync(JobType::RiderSync, move || async move {
            assert_eq!(coordinator.current_job_type().await, Some(JobType::RiderSync));
            Ok(metrics(JobType::RiderSync, 5))
        })
        .await;

    assert_eq!(result.unwrap().processed, 5);
    assert_eq!(f.clock.now(), at(10, 30));
    assert_eq!(f.coordinator.current_job_type().await, None);
}

#[tokio::test]
async fn test_pause_holds_queue_until_resume() {
    let f = open_fixture();
    f.coordinator.pause().await;

    let handle = {
        let coordinator = f.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(JobType::RiderSync, || async {
                    Ok(metrics(JobType::RiderSync, 1))
                })
                .await
        })
    };

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let status = f.coordinator.get_status().await;
    assert!(status.paused);
    assert!(!status.is_processing);
    assert_eq!(status.queue_length, 1);

    f.coordinator.resume().await;
    assert!(handle.await.unwrap().is_ok());
    assert!(!f.coordinator.get_status().await.paused);
}

#[tokio::test]
async fn test_status_snapshot_shape() {
    let f = fixture(at(10, 6), SlotTable::default());
    f.coordinator.pause().await;

    let coordinator = f.coordinator.clone();
    let _pending = tokio::spawn(async move {
        coordinator
            .queue_sync(JobType::FarEventSync, || async {
                Ok(metrics(JobType::FarEventSync, 0))
            })
            .await
    });
    while f.coordinator.queue_length().await < 1 {
        tokio::task::yield_now().await;
    }
    f.clock.advance(Duration::from_secs(2));

    let status = f.coordinator.get_status().await;
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.queue[0].job_type, JobType::FarEventSync);
    assert_eq!(status.queue[0].priority, 3);
    assert_eq!(status.queue[0].age_ms, 2000);
    assert_eq!(status.time_slots.len(), JobType::ALL.len());

    let near = status
        .time_slots
        .iter()
        .find(|s| s.job_type == JobType::NearEventSync)
        .unwrap();
    assert!(near.can_run_now);
    assert_eq!(near.interval_minutes, 15);
    assert_eq!(near.offset_minutes, 5);

    let json = serde_json::to_value(&status).unwrap();
    assert!(json.get("isProcessing").is_some());
    assert!(json.get("currentJobType").is_some());
    assert_eq!(json["queue"][0]["jobType"], "FAR_EVENT_SYNC");
    assert!(json["timeSlots"][0].get("nextSlot").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_under_concurrency() {
    let f = open_fixture();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let jobs = [
        JobType::RiderSync,
        JobType::NearEventSync,
        JobType::FarEventSync,
        JobType::CombinedEventSync,
        JobType::ResultsSync,
        JobType::RiderSync,
        JobType::NearEventSync,
        JobType::FarEventSync,
    ];

    let mut handles = Vec::new();
    for (i, job) in jobs.into_iter().enumerate() {
        let coordinator = f.coordinator.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let observer = coordinator.clone();
            let executor = move || async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert_eq!(observer.current_job_type().await, Some(job));
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(metrics(job, i as u32))
            };
            // Mix in manual triggers
            if i % 3 == 0 {
                coordinator.force_sync(job, executor).await
            } else {
                coordinator.queue_sync(job, executor).await
            }
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap().processed, i as u32);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(f.coordinator.current_job_type().await, None);
}

/// Start a forced RiderSync that holds the execution lock until `hold` is
/// notified, then spends the club_members quota.
async fn hold_forced_run(
    f: &Fixture,
    hold: Arc<Notify>,
) -> tokio::task::JoinHandle<crate::coordinator::SyncResult> {
    let coordinator = f.coordinator.clone();
    let limiter = f.limiter.clone();
    let handle = tokio::spawn(async move {
        coordinator
            .force_sync(JobType::RiderSync, move || async move {
                hold.notified().await;
                limiter
                    .execute_with_limit(Endpoint::ClubMembers, || async {
                        Ok::<_, SyncError>(())
                    })
                    .await
                    .map(|()| metrics(JobType::RiderSync, 1))
            })
            .await
    });
    while f.coordinator.current_job_type().await.is_none() {
        tokio::task::yield_now().await;
    }
    handle
}

#[tokio::test]
async fn test_queued_run_rechecks_quota_spent_by_forced_run() {
    let f = open_fixture();
    let hold = Arc::new(Notify::new());
    let forced = hold_forced_run(&f, hold.clone()).await;

    let queued = {
        let coordinator = f.coordinator.clone();
        let limiter = f.limiter.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(JobType::RiderSync, move || async move {
                    limiter
                        .execute_with_limit(Endpoint::ClubMembers, || async {
                            Ok::<_, SyncError>(())
                        })
                        .await
                        .map(|()| metrics(JobType::RiderSync, 2))
                })
                .await
        })
    };
    while f.coordinator.queue_length().await < 1 {
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    hold.notify_one();
    assert_eq!(forced.await.unwrap().unwrap().processed, 1);

    // The queued run waited for the window the forced run used
    assert_eq!(queued.await.unwrap().unwrap().processed, 2);
    assert!(f.clock.now() >= at(11, 0));
}

#[tokio::test]
async fn test_pause_during_forced_run_holds_queued_request() {
    let f = open_fixture();
    let hold = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let forced = hold_forced_run(&f, hold.clone()).await;

    let queued = {
        let coordinator = f.coordinator.clone();
        let runs = runs.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(JobType::NearEventSync, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(metrics(JobType::NearEventSync, 1))
                })
                .await
        })
    };
    while f.coordinator.queue_length().await < 1 {
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    f.coordinator.pause().await;
    hold.notify_one();
    assert!(forced.await.unwrap().is_ok());
    while f.coordinator.get_status().await.is_processing {
        tokio::task::yield_now().await;
    }

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(f.coordinator.queue_length().await, 1);

    f.coordinator.resume().await;
    assert!(queued.await.unwrap().is_ok());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// A manual clock whose sleeps block until released, so a test can act
/// while the drain loop is waiting.
#[derive(Clone)]
struct GatedClock {
    inner: ManualClock,
    sleeping: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

impl GatedClock {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: ManualClock::new(start),
            sleeping: Arc::new(AtomicUsize::new(0)),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Clock for GatedClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeping.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        self.inner.advance(duration);
    }
}

#[tokio::test]
async fn test_urgent_request_overtakes_head_waiting_on_quota() {
    let gated = GatedClock::new(at(10, 0));
    let clock: Arc<dyn Clock> = Arc::new(gated.clone());
    let limiter = Arc::new(RateLimiter::new(clock.clone()));
    let coordinator = Coordinator::new(limiter.clone(), clock, SlotTable::always_open());
    limiter
        .execute_with_limit(Endpoint::EventResults, || async { Ok::<_, SyncError>(()) })
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = |job: JobType| {
        let coordinator = coordinator.clone();
        let order = order.clone();
        tokio::spawn(async move {
            coordinator
                .queue_sync(job, move || async move {
                    order.lock().unwrap().push(job);
                    Ok(metrics(job, 1))
                })
                .await
        })
    };

    let results = queue(JobType::ResultsSync);
    // Parked on the event_results window
    while gated.sleeping.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let rider = queue(JobType::RiderSync);
    assert!(rider.await.unwrap().is_ok());
    assert_eq!(*order.lock().unwrap(), vec![JobType::RiderSync]);
    assert_eq!(coordinator.queue_length().await, 1);

    gated.release.notify_one();
    assert!(results.await.unwrap().is_ok());
    assert_eq!(
        *order.lock().unwrap(),
        vec![JobType::RiderSync, JobType::ResultsSync]
    );
    assert_eq!(gated.now(), at(10, 1));
}
