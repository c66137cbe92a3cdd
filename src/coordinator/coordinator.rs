// ABOUTME: Sync coordinator that serializes sync jobs through a priority queue.
// ABOUTME: Gates each job on its time slot and on the rate limiter before running it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, Notify, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{JobType, SlotTable};
use super::rate_limiter::{Endpoint, RateLimiter};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;

/// Result every executor produces.
pub type SyncResult = Result<SyncMetrics, SyncError>;

/// A boxed, not-yet-started executor run.
type Executor = Box<dyn FnOnce() -> BoxFuture<'static, SyncResult> + Send>;

/// A pending sync request, owned by the coordinator's queue.
struct QueuedRequest {
    id: Uuid,
    job_type: JobType,
    priority: u8,
    enqueued_at: DateTime<Utc>,
    /// Taken when the request starts running.
    executor: Option<Executor>,
    /// Resolved with the executor's result once it finishes.
    reply: Option<oneshot::Sender<SyncResult>>,
}

/// Mutable coordinator state, protected by a single mutex.
#[derive(Default)]
struct CoordinatorState {
    queue: Vec<QueuedRequest>,
    is_processing: bool,
    current_job_type: Option<JobType>,
    paused: bool,
}

struct Inner {
    state: Mutex<CoordinatorState>,
    /// Held for the whole of every executor run, queued or forced.
    run_lock: Mutex<()>,
    /// Wakes a waiting drain loop when the queue or pause state changes.
    wake: Notify,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    slots: SlotTable,
}

/// Answer to "may this job spend its endpoints' quota now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCheck {
    pub can_run: bool,
    /// First endpoint found exhausted, if any.
    pub blocked_by: Option<Endpoint>,
}

/// Queue entry as shown in [`CoordinatorStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestStatus {
    pub id: Uuid,
    pub job_type: JobType,
    pub priority: u8,
    pub age_ms: i64,
}

/// Time slot state as shown in [`CoordinatorStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlotStatus {
    pub job_type: JobType,
    pub can_run_now: bool,
    pub next_slot: DateTime<Utc>,
    pub interval_minutes: u32,
    pub offset_minutes: u32,
}

/// Operational snapshot of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub is_processing: bool,
    pub paused: bool,
    pub current_job_type: Option<JobType>,
    pub queue_length: usize,
    pub queue: Vec<QueuedRequestStatus>,
    pub time_slots: Vec<TimeSlotStatus>,
}

/// Serializes sync jobs against shared API quotas.
///
/// Jobs are queued with their type's static priority and drained one at a
/// time, ordered by `(priority, enqueued_at)`. Before running the head of the
/// queue the drain loop waits for the job's time slot and for every endpoint
/// the job depends on to have quota left; the queue is re-sorted after each
/// wait so a more urgent job enqueued meanwhile goes first.
///
/// # Guarantees
///
/// - **Single-flight:** at most one executor runs at any instant, whether it
///   came through [`queue_sync`](Self::queue_sync) or
///   [`force_sync`](Self::force_sync).
/// - **Own result:** every `queue_sync` caller receives its own executor's
///   result or error.
/// - **No automatic retry:** a failed request is removed and its error is
///   returned to its caller.
///
/// `Coordinator` is a cheap handle; clones share the same queue.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator over `limiter`, using `slots` for job windows.
    pub fn new(limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>, slots: SlotTable) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoordinatorState::default()),
                run_lock: Mutex::new(()),
                wake: Notify::new(),
                limiter,
                clock,
                slots,
            }),
        }
    }

    /// The rate limiter this coordinator consults.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// Whether `job_type` is inside its recurring time slot right now.
    pub fn can_run_now(&self, job_type: JobType) -> bool {
        let slot = self.inner.slots.slot(job_type);
        slot.is_open_at(self.inner.clock.now(), self.inner.slots.width_minutes())
    }

    /// When `job_type`'s time slot next opens (now, if it is open).
    pub fn get_next_slot(&self, job_type: JobType) -> DateTime<Utc> {
        let now = self.inner.clock.now();
        self.inner
            .slots
            .slot(job_type)
            .next_open(now, self.inner.slots.width_minutes())
            .unwrap_or_else(|| now + chrono::Duration::hours(1))
    }

    /// Check the rate limiter for every endpoint `job_type` depends on.
    pub async fn can_sync_run(&self, job_type: JobType) -> RunCheck {
        let status = self.inner.limiter.get_status().await;
        let blocked_by = job_type
            .endpoints()
            .iter()
            .copied()
            .find(|endpoint| status.get(endpoint).is_some_and(|s| !s.can_call));

        RunCheck {
            can_run: blocked_by.is_none(),
            blocked_by,
        }
    }

    /// Queue a sync job and wait for its executor's result.
    ///
    /// Starts the drain loop if it is idle. The returned future resolves once
    /// this request ran, with the executor's own result, or with
    /// [`SyncError::Dropped`] if the coordinator went away first.
    pub async fn queue_sync<F, Fut>(&self, job_type: JobType, executor: F) -> SyncResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            job_type,
            priority: job_type.priority(),
            enqueued_at: self.inner.clock.now(),
            executor: Some(Box::new(move || executor().boxed())),
            reply: Some(tx),
        };

        {
            let mut state = self.inner.state.lock().await;
            info!(
                job_type = %job_type,
                priority = request.priority,
                queue_length = state.queue.len() + 1,
                "queued sync"
            );
            state.queue.push(request);
            sort_queue(&mut state.queue);
            self.ensure_draining(&mut state);
        }
        self.inner.wake.notify_one();

        rx.await.unwrap_or(Err(SyncError::Dropped))
    }

    /// Run a job immediately, skipping the queue and its time slot.
    ///
    /// Still waits for any executor already running, so single-flight holds.
    pub async fn force_sync<F, Fut>(&self, job_type: JobType, executor: F) -> SyncResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult> + Send + 'static,
    {
        info!(job_type = %job_type, "force sync");

        let _running = self.inner.run_lock.lock().await;
        self.inner.state.lock().await.current_job_type = Some(job_type);

        let result = run_guarded(Box::new(move || executor().boxed())).await;

        self.inner.state.lock().await.current_job_type = None;
        log_outcome(job_type, &result);
        result
    }

    /// Stop starting new executions. A running executor still completes.
    pub async fn pause(&self) {
        self.inner.state.lock().await.paused = true;
        self.inner.wake.notify_one();
        info!("coordinator paused");
    }

    /// Resume draining after [`pause`](Self::pause).
    pub async fn resume(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.paused = false;
            self.ensure_draining(&mut state);
        }
        self.inner.wake.notify_one();
        info!("coordinator resumed");
    }

    /// Job type whose executor is running, if any.
    pub async fn current_job_type(&self) -> Option<JobType> {
        self.inner.state.lock().await.current_job_type
    }

    /// Number of requests queued or running.
    pub async fn queue_length(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Snapshot of the queue and time slots for operational inspection.
    pub async fn get_status(&self) -> CoordinatorStatus {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock().await;

        let queue = state
            .queue
            .iter()
            .map(|r| QueuedRequestStatus {
                id: r.id,
                job_type: r.job_type,
                priority: r.priority,
                age_ms: (now - r.enqueued_at).num_milliseconds(),
            })
            .collect();

        let time_slots = self
            .inner
            .slots
            .iter()
            .map(|(job_type, slot)| TimeSlotStatus {
                job_type,
                can_run_now: self.can_run_now(job_type),
                next_slot: self.get_next_slot(job_type),
                interval_minutes: slot.interval_minutes,
                offset_minutes: slot.offset_minutes,
            })
            .collect();

        CoordinatorStatus {
            is_processing: state.is_processing,
            paused: state.paused,
            current_job_type: state.current_job_type,
            queue_length: state.queue.len(),
            queue,
            time_slots,
        }
    }

    /// Spawn the drain loop unless one is running, the queue is empty, or
    /// the coordinator is paused.
    fn ensure_draining(&self, state: &mut CoordinatorState) {
        if state.is_processing || state.paused || state.queue.is_empty() {
            return;
        }
        state.is_processing = true;
        tokio::spawn(self.clone().drain());
    }

    async fn drain(self) {
        debug!("drain loop started");
        loop {
            // Held from the checks through the run; a forced run or a pause
            // must not slip in between.
            let running = self.inner.run_lock.lock().await;

            let (id, job_type) = {
                let mut state = self.inner.state.lock().await;
                if state.paused || state.queue.is_empty() {
                    state.is_processing = false;
                    debug!(paused = state.paused, "drain loop stopped");
                    return;
                }
                (state.queue[0].id, state.queue[0].job_type)
            };

            if !self.can_run_now(job_type) {
                drop(running);
                let next_slot = self.get_next_slot(job_type);
                let wait = until(self.inner.clock.now(), next_slot);
                info!(
                    job_type = %job_type,
                    next_slot = %next_slot,
                    wait_secs = wait.as_secs(),
                    "outside time slot, waiting"
                );
                self.wait(wait).await;
                self.resort().await;
                continue;
            }

            let check = self.can_sync_run(job_type).await;
            if let Some(blocked_by) = check.blocked_by {
                drop(running);
                let wait = self.inner.limiter.get_wait_time(blocked_by).await;
                info!(
                    job_type = %job_type,
                    blocked_by = %blocked_by,
                    wait_secs = wait.as_secs(),
                    "rate limited, waiting"
                );
                self.wait(wait).await;
                self.resort().await;
                continue;
            }

            self.run(id, job_type, running).await;
        }
    }

    /// Execute one queued request and hand its result to the caller.
    ///
    /// `_running` is the execution lock the drain loop checked the request
    /// under; it is released once the request is removed from the queue.
    async fn run(&self, id: Uuid, job_type: JobType, _running: MutexGuard<'_, ()>) {
        let (executor, reply) = {
            let mut state = self.inner.state.lock().await;
            let Some(request) = state.queue.iter_mut().find(|r| r.id == id) else {
                return;
            };
            let taken = (request.executor.take(), request.reply.take());
            state.current_job_type = Some(job_type);
            info!(job_type = %job_type, queue_length = state.queue.len(), "running sync");
            taken
        };

        let result = match executor {
            Some(executor) => run_guarded(executor).await,
            None => Err(SyncError::Dropped),
        };

        {
            let mut state = self.inner.state.lock().await;
            state.queue.retain(|r| r.id != id);
            state.current_job_type = None;
        }

        log_outcome(job_type, &result);
        if let Some(reply) = reply {
            if reply.send(result).is_err() {
                debug!(job_type = %job_type, "caller stopped waiting for sync result");
            }
        }
    }

    /// Sleep for `duration`, or less if woken by a queue change.
    async fn wait(&self, duration: Duration) {
        tokio::select! {
            biased;
            () = self.inner.wake.notified() => debug!("drain loop woken early"),
            () = self.inner.clock.sleep(duration) => {}
        }
    }

    async fn resort(&self) {
        let mut state = self.inner.state.lock().await;
        sort_queue(&mut state.queue);
        debug!(queue_length = state.queue.len(), "queue re-sorted");
    }
}

/// Order by priority, then enqueue time. The sort is stable, so requests
/// enqueued at the same instant keep arrival order.
fn sort_queue(queue: &mut [QueuedRequest]) {
    queue.sort_by(|a, b| (a.priority, a.enqueued_at).cmp(&(b.priority, b.enqueued_at)));
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run an executor, turning a panic into an executor failure.
async fn run_guarded(executor: Executor) -> SyncResult {
    match AssertUnwindSafe(executor()).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(SyncError::executor(anyhow::anyhow!("executor panicked"))),
    }
}

fn log_outcome(job_type: JobType, result: &SyncResult) {
    match result {
        Ok(metrics) => info!(
            job_type = %job_type,
            status = %metrics.status,
            processed = metrics.processed,
            duration_ms = metrics.duration_ms,
            "sync completed"
        ),
        Err(SyncError::RateLimited(exceeded)) => warn!(
            job_type = %job_type,
            endpoint = %exceeded.endpoint,
            reset_at = %exceeded.reset_at,
            "sync hit rate limit"
        ),
        Err(err) => error!(job_type = %job_type, error = %err, "sync failed"),
    }
}
