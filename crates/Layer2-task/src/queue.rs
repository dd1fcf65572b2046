//! Work Queue - bounded worker pool with request coalescing
//!
//! Features:
//! - At most one executing job per fingerprint; later submitters join it
//! - Priority ordering `(priority desc, enqueued asc)`
//! - Per-job timeout
//! - Per-waiter cancellation
//!
//! ```text
//! submit(fp) ──► in-flight table ──(new)──► pending heap ──► worker 1..N
//!                    │                                           │
//!                    └──(exists)── attach waiter        outcome ─┘
//!                                                          │
//!                              waiters notified in attach order
//! ```

use crate::executor::JobExecutor;
use crate::state::JobState;
use crate::task::{JobId, Priority};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use enrich_foundation::{Error, EventBus, EventKind, Fingerprint, QueueConfig, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Configuration for the work queue
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Number of workers
    pub max_concurrency: usize,

    /// Executor time limit
    pub job_timeout: Duration,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for WorkQueueConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            job_timeout: config.job_timeout(),
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub pending: usize,
    pub running: usize,
    pub in_flight: usize,
}

// ============================================================================
// Internal state
// ============================================================================

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Result<T>>,
}

struct InFlightEntry<T> {
    job_id: JobId,
    state: JobState,
    waiters: Vec<Waiter<T>>,
    enqueued_at: Instant,
    started_at: Option<Instant>,
}

struct QueuedJob<T> {
    job_id: JobId,
    fingerprint: Fingerprint,
    priority: Priority,
    seq: u64,
    executor: Box<dyn JobExecutor<T>>,
}

impl<T> PartialEq for QueuedJob<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<T> Eq for QueuedJob<T> {}

impl<T> PartialOrd for QueuedJob<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedJob<T> {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

struct Shared<T> {
    config: WorkQueueConfig,
    in_flight: DashMap<Fingerprint, InFlightEntry<T>>,
    pending: Mutex<BinaryHeap<QueuedJob<T>>>,
    notify: Notify,
    shutdown: CancellationToken,
    closed: AtomicBool,
    running: AtomicUsize,
    next_seq: AtomicU64,
    next_waiter: AtomicU64,
    counters: Counters,
    events: Option<Arc<EventBus>>,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn publish(&self, kind: EventKind) {
        if let Some(bus) = &self.events {
            bus.publish(kind);
        }
    }

    /// Move a popped job from Queued to Running. False for stale jobs whose
    /// entry was cancelled or replaced.
    fn claim(&self, job: &QueuedJob<T>) -> bool {
        match self.in_flight.get_mut(&job.fingerprint) {
            Some(mut entry) if entry.job_id == job.job_id && entry.state == JobState::Queued => {
                entry.state = JobState::Running;
                entry.started_at = Some(Instant::now());
                trace!(
                    fingerprint = %job.fingerprint.short(),
                    queued_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "Job claimed"
                );
                true
            }
            _ => false,
        }
    }

    async fn run(&self, job: QueuedJob<T>) {
        let fingerprint = job.fingerprint;
        self.running.fetch_add(1, Ordering::SeqCst);
        debug!(
            fingerprint = %fingerprint.short(),
            job_id = %job.job_id,
            priority = %job.priority,
            executor = job.executor.name(),
            "Job started"
        );

        let execution = AssertUnwindSafe(job.executor.execute()).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.job_timeout, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(Error::executor(fingerprint, panic_message(panic))),
            Err(_) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    timeout_ms = self.config.job_timeout.as_millis() as u64,
                    "Job timed out"
                );
                Err(Error::timeout(fingerprint, self.config.job_timeout))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.complete(fingerprint, job.job_id, outcome);
    }

    /// Remove the in-flight entry and fan the outcome out to its waiters
    fn complete(&self, fingerprint: Fingerprint, job_id: JobId, outcome: Result<T>) {
        let state = JobState::from_outcome(&outcome);
        let counter = match state {
            JobState::Completed => &self.counters.completed,
            JobState::TimedOut => &self.counters.timed_out,
            _ => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let Some((_, entry)) = self
            .in_flight
            .remove_if(&fingerprint, |_, e| e.job_id == job_id)
        else {
            return;
        };

        let elapsed_ms = entry
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        debug!(
            fingerprint = %fingerprint.short(),
            state = %state,
            waiters = entry.waiters.len(),
            elapsed_ms,
            "Job finished"
        );

        match &outcome {
            Ok(_) => self.publish(EventKind::MissCompleted {
                fingerprint,
                duration_ms: elapsed_ms,
            }),
            Err(e) => self.publish(EventKind::MissFailed {
                fingerprint,
                error: e.to_string(),
            }),
        }

        for waiter in entry.waiters {
            // Receiver may be gone; that waiter no longer cares
            let _ = waiter.tx.send(outcome.clone());
        }
    }

    /// Detach one waiter. A queued job left with no waiters is cancelled.
    fn detach(&self, fingerprint: &Fingerprint, job_id: JobId, waiter_id: u64) {
        let orphaned = match self.in_flight.get_mut(fingerprint) {
            Some(mut entry) if entry.job_id == job_id => {
                entry.waiters.retain(|w| w.id != waiter_id);
                entry.waiters.is_empty() && entry.state == JobState::Queued
            }
            _ => false,
        };

        if !orphaned {
            return;
        }

        let removed = self.in_flight.remove_if(fingerprint, |_, e| {
            e.job_id == job_id && e.waiters.is_empty() && e.state == JobState::Queued
        });

        if removed.is_some() {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), job_id = %job_id, "Job cancelled");
            self.publish(EventKind::JobCancelled {
                fingerprint: *fingerprint,
            });
        }
    }
}

impl<T> Shared<T> {
    /// Fail every queued job with QueueClosed
    fn fail_pending(&self) {
        let drained: Vec<QueuedJob<T>> = self.pending.lock().drain().collect();

        for job in drained {
            let removed = self.in_flight.remove_if(&job.fingerprint, |_, e| {
                e.job_id == job.job_id && e.state == JobState::Queued
            });
            if let Some((_, entry)) = removed {
                for waiter in entry.waiters {
                    let _ = waiter.tx.send(Err(Error::QueueClosed));
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("executor panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("executor panicked: {}", s)
    } else {
        "executor panicked".to_string()
    }
}

async fn worker_loop<T: Clone + Send + Sync + 'static>(shared: Arc<Shared<T>>, worker_id: usize) {
    trace!("Worker {} started", worker_id);

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let next = shared.pending.lock().pop();
        match next {
            Some(job) => {
                if shared.claim(&job) {
                    shared.run(job).await;
                }
            }
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = shared.notify.notified() => {}
                }
            }
        }
    }

    trace!("Worker {} stopped", worker_id);
}

// ============================================================================
// WorkQueue
// ============================================================================

/// Bounded worker pool keyed by fingerprint
///
/// Workers are spawned on the current tokio runtime at construction.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> WorkQueue<T> {
    /// Create a queue and spawn its workers
    pub fn new(config: WorkQueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a queue that publishes job completion, failure and
    /// cancellation events
    pub fn with_events(config: WorkQueueConfig, events: Arc<EventBus>) -> Self {
        Self::build(config, Some(events))
    }

    fn build(config: WorkQueueConfig, events: Option<Arc<EventBus>>) -> Self {
        let worker_count = config.max_concurrency.max(1);
        let shared = Arc::new(Shared {
            config,
            in_flight: DashMap::new(),
            pending: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            next_waiter: AtomicU64::new(0),
            counters: Counters::default(),
            events,
        });

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(worker_loop(Arc::clone(&shared), id)))
            .collect();

        info!("Work queue started with {} workers", worker_count);

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a job, or join the in-flight job for the same fingerprint.
    ///
    /// When a job for `fingerprint` is already queued or running, the
    /// executor is dropped unused and the returned handle resolves with that
    /// job's outcome.
    pub fn submit<E>(
        &self,
        fingerprint: Fingerprint,
        priority: Priority,
        executor: E,
    ) -> Result<JobHandle<T>>
    where
        E: JobExecutor<T> + 'static,
    {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.shared.next_waiter.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let (job_id, coalesced) = match self.shared.in_flight.entry(fingerprint) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.waiters.push(Waiter { id: waiter_id, tx });
                (entry.job_id, true)
            }
            Entry::Vacant(vacant) => {
                let job_id = JobId::new();
                vacant.insert(InFlightEntry {
                    job_id,
                    state: JobState::Queued,
                    waiters: vec![Waiter { id: waiter_id, tx }],
                    enqueued_at: Instant::now(),
                    started_at: None,
                });
                (job_id, false)
            }
        };

        if coalesced {
            self.shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), job_id = %job_id, "Joined in-flight job");
        } else {
            let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
            self.shared.pending.lock().push(QueuedJob {
                job_id,
                fingerprint,
                priority,
                seq,
                executor: Box::new(executor),
            });
            self.shared.notify.notify_one();
            debug!(
                fingerprint = %fingerprint.short(),
                job_id = %job_id,
                %priority,
                "Job enqueued"
            );

            // Raced with shutdown; don't leave the job stranded
            if self.shared.closed.load(Ordering::SeqCst) {
                self.shared.fail_pending();
            }
        }

        Ok(JobHandle {
            rx: Some(rx),
            shared: Arc::clone(&self.shared),
            fingerprint,
            job_id,
            waiter_id,
            coalesced,
        })
    }

    /// Jobs waiting for a worker
    pub fn pending_count(&self) -> usize {
        self.shared
            .in_flight
            .iter()
            .filter(|e| e.state == JobState::Queued)
            .count()
    }

    /// Jobs currently executing
    pub fn running_count(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Fingerprints with a queued or running job
    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// State of the job for a fingerprint, if one is in flight
    pub fn job_state(&self, fingerprint: &Fingerprint) -> Option<JobState> {
        self.shared.in_flight.get(fingerprint).map(|e| e.state)
    }

    /// Number of waiters attached to an in-flight fingerprint
    pub fn waiter_count(&self, fingerprint: &Fingerprint) -> usize {
        self.shared
            .in_flight
            .get(fingerprint)
            .map(|e| e.waiters.len())
            .unwrap_or(0)
    }

    pub fn config(&self) -> &WorkQueueConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            pending: self.pending_count(),
            running: self.running_count(),
            in_flight: self.in_flight_count(),
        }
    }

    /// Stop accepting work, fail queued jobs with `QueueClosed` and wait
    /// for running jobs to finish.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down work queue");
        self.shared.shutdown.cancel();
        self.shared.fail_pending();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.shutdown.cancel();
        self.shared.fail_pending();
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("config", &self.shared.config)
            .field("in_flight", &self.shared.in_flight.len())
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// JobHandle
// ============================================================================

/// One waiter's view of a job.
///
/// Dropping the handle before the outcome arrives detaches this waiter
/// only; other waiters are unaffected.
pub struct JobHandle<T: Clone + Send + Sync + 'static> {
    rx: Option<oneshot::Receiver<Result<T>>>,
    shared: Arc<Shared<T>>,
    fingerprint: Fingerprint,
    job_id: JobId,
    waiter_id: u64,
    coalesced: bool,
}

impl<T: Clone + Send + Sync + 'static> JobHandle<T> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// True when this handle joined an existing job
    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }

    /// Wait for the shared outcome
    pub async fn wait(mut self) -> Result<T> {
        let outcome = match self.rx.as_mut() {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Cancelled),
            },
            None => Err(Error::Cancelled),
        };
        self.rx = None;
        outcome
    }

    /// Stop waiting; the job keeps running for any other waiter
    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.rx.take().is_some() {
            self.shared
                .detach(&self.fingerprint, self.job_id, self.waiter_id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for JobHandle<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("fingerprint", &self.fingerprint)
            .field("job_id", &self.job_id)
            .field("coalesced", &self.coalesced)
            .finish()
    }
}
