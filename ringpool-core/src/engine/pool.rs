//! Job Pool - Two-Stage Worker Pipeline
//!
//! Multiplexes many stateful jobs over a fixed number of worker pairs. Each
//! pair runs one dispatch worker and one ingest worker; all pairs share the
//! same two queues, so concurrency scales with the pair count rather than
//! with the number of jobs.
//!
//! # Lifecycle:
//! ```text
//!  build() ──▶ paused ──join()──▶ running ──close()──▶ draining ──▶ stopped
//!                │                                                   │
//!                └──── add_job() queues, nothing is processed        │
//!                                          shutdown() returns leftovers
//! ```
//!
//! # Fault Policy:
//! A panic inside a phase handler ends the worker that ran it. The job it
//! held is dropped, the worker is not restarted, and the other workers keep
//! going. [`Pool::join`] reports such workers in [`JoinSummary::faulted`].

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug_span, error, info, Instrument};

use crate::config::{PoolConfig, ResumeStrategy};
use crate::engine::worker::{self, Shared, Stage};
use crate::error::PoolError;
use crate::handler::{BoxFuture, PhaseFn, PhaseHandler, Phases};
use crate::job::Stateful;
use crate::stats::{PoolMetrics, PoolSnapshot};

/// Outcome of waiting for a pool's workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Workers that left their loop normally.
    pub exited: usize,
    /// Workers that ended because a handler panicked.
    pub faulted: usize,
}

/// Cloneable handle that can close a pool from anywhere, including from
/// inside a phase handler.
#[derive(Debug, Clone)]
pub struct PoolCloser {
    cancel: CancellationToken,
}

impl PoolCloser {
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Builder for [`Pool`].
///
/// # Example
/// ```rust,no_run
/// # #[tokio::main] async fn main() -> Result<(), ringpool_core::PoolError> {
/// use ringpool_core::{Job, JobState, Pool, Stateful};
///
/// let pool = Pool::<Job<String>>::builder()
///     .worker_pairs(Some(2))
///     .on_read(|job| Box::pin(async move {
///         job.set_state(JobState::Write);
///         true
///     }))
///     .on_write(|job| Box::pin(async move {
///         job.set_state(JobState::Close);
///         true
///     }))
///     .build()?;
///
/// pool.add_job(Job::new("hello".to_string()));
/// pool.close();
/// pool.join().await;
/// # Ok(()) }
/// ```
pub struct PoolBuilder<T> {
    config: PoolConfig,
    base: Option<Arc<dyn PhaseHandler<T>>>,
    read: Option<PhaseFn<T>>,
    write: Option<PhaseFn<T>>,
    metrics: Option<Arc<PoolMetrics>>,
}

impl<T: Stateful + Send + 'static> PoolBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            base: None,
            read: None,
            write: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// `None` picks half the available parallelism (at least one).
    pub fn worker_pairs(mut self, pairs: Option<usize>) -> Self {
        self.config.worker_pairs = pairs;
        self
    }

    pub fn resume(mut self, strategy: ResumeStrategy) -> Self {
        self.config.resume = strategy;
        self
    }

    /// Base handler supplying any phase without an override.
    pub fn handler(mut self, handler: impl PhaseHandler<T>) -> Self {
        self.base = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn PhaseHandler<T>>) -> Self {
        self.base = Some(handler);
        self
    }

    /// Override the read phase.
    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.read = Some(Arc::new(f));
        self
    }

    /// Override the write phase.
    pub fn on_write<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(f));
        self
    }

    pub fn metrics(mut self, metrics: Arc<PoolMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve handlers and start every worker, paused.
    pub fn build(self) -> Result<Pool<T>, PoolError> {
        let pairs = self.config.resolved_pairs()?;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let phases = Phases::resolve(self.base, self.read, self.write)?;
        let metrics = self.metrics.unwrap_or_default();
        let shared = Arc::new(Shared::new(phases, self.config.resume, metrics));

        info!(
            pairs,
            workers = pairs * 2,
            resume = ?self.config.resume,
            "Starting job pool (paused until join)"
        );

        let tracker = TaskTracker::new();
        let mut workers = Vec::with_capacity(pairs * 2);
        for pair in 0..pairs {
            let dispatch = worker::dispatch_worker(Arc::clone(&shared))
                .instrument(debug_span!("worker", pair, stage = %Stage::Dispatch));
            workers.push(tracker.spawn_on(dispatch, &runtime));

            let ingest = worker::ingest_worker(Arc::clone(&shared))
                .instrument(debug_span!("worker", pair, stage = %Stage::Ingest));
            workers.push(tracker.spawn_on(ingest, &runtime));
        }
        tracker.close();

        Ok(Pool {
            shared,
            tracker,
            workers: Mutex::new(workers),
            pairs,
        })
    }
}

impl<T: Stateful + Send + 'static> Default for PoolBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The job pool engine.
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
    tracker: TaskTracker,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pairs: usize,
}

impl<T: Stateful + Send + 'static> Pool<T> {
    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::new()
    }

    /// Build a pool around one handler covering both phases.
    pub fn new(handler: impl PhaseHandler<T>, worker_pairs: Option<usize>) -> Result<Self, PoolError> {
        PoolBuilder::new()
            .handler(handler)
            .worker_pairs(worker_pairs)
            .build()
    }

    /// Submit a job. Never blocks.
    ///
    /// Jobs submitted before [`join`](Self::join) wait in the queue. Jobs
    /// submitted after [`close`](Self::close) are held until
    /// [`shutdown`](Self::shutdown) hands them back.
    pub fn add_job(&self, job: T) {
        self.shared.submit(job);
    }

    /// Release the workers and wait until all of them have exited.
    ///
    /// Returns only after the pool has been closed. Calling it again (or
    /// concurrently) waits for the same exit and returns an empty summary.
    pub async fn join(&self) -> JoinSummary {
        self.shared.gate.release();
        info!("Job pool released");

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let mut summary = JoinSummary::default();
        for handle in handles {
            match handle.await {
                Ok(()) => summary.exited += 1,
                Err(e) if e.is_panic() => {
                    error!(error = %e, "Worker terminated by a handler panic");
                    summary.faulted += 1;
                }
                Err(e) => {
                    error!(error = %e, "Worker task cancelled by the runtime");
                    summary.faulted += 1;
                }
            }
        }
        self.tracker.wait().await;

        info!(
            exited = summary.exited,
            faulted = summary.faulted,
            "Job pool stopped"
        );
        summary
    }

    /// Signal every worker to stop. Idempotent; does not wait.
    pub fn close(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("Closing job pool");
        }
        self.shared.cancel.cancel();
    }

    pub fn closer(&self) -> PoolCloser {
        PoolCloser {
            cancel: self.shared.cancel.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Close, wait for the workers, and hand back every job still queued or
    /// parked so the owner can release it. A second call returns nothing.
    pub async fn shutdown(&self) -> Vec<T> {
        self.close();
        self.tracker.wait().await;
        let leftovers = self.shared.drain().await;
        info!(leftovers = leftovers.len(), "Job pool shut down");
        leftovers
    }

    pub fn worker_pairs(&self) -> usize {
        self.pairs
    }

    /// Total workers started: two per pair.
    pub fn worker_count(&self) -> usize {
        self.pairs * 2
    }

    /// Workers currently inside their loop.
    pub fn live_workers(&self) -> usize {
        self.shared.metrics.live_workers() as usize
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn stats(&self) -> PoolSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
