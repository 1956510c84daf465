//! Dispatch and ingest worker loops.
//!
//! ```text
//!              add_job
//!                 │
//!                 ▼
//!        ┌─────────────────┐   Read    ┌─────────────────┐
//!        │ dispatch queue  │──────────▶│  ingest queue   │
//!        └─────────────────┘           └─────────────────┘
//!          │ Write      ▲                 │       ▲
//!          ▼            │ Read/Write      ▼       │ Read
//!       write()         └──────────── read()      │
//!          └──────────────────────────────────────┘
//! ```
//!
//! Dispatch workers branch on the job state and perform writes; ingest
//! workers always perform reads. A job moves by value between queues and
//! workers, so it is never held by two workers at once.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ResumeStrategy;
use crate::engine::gate::PauseGate;
use crate::engine::queue::JobQueue;
use crate::handler::Phases;
use crate::job::{DropReason, JobState, Phase, Route, Stateful};
use crate::stats::{PoolMetrics, ScopedTimer};

/// The two worker roles of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dispatch,
    Ingest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => write!(f, "dispatch"),
            Self::Ingest => write!(f, "ingest"),
        }
    }
}

/// State shared by every worker of one pool.
pub(crate) struct Shared<T> {
    dispatch: JobQueue<T>,
    ingest: JobQueue<T>,
    dispatch_checkpoint: Semaphore,
    ingest_checkpoint: Semaphore,
    pub(crate) cancel: CancellationToken,
    pub(crate) gate: PauseGate,
    phases: Phases<T>,
    pub(crate) metrics: Arc<PoolMetrics>,
    /// Jobs that finished a phase after cancellation.
    parked: Mutex<Vec<T>>,
}

impl<T: Stateful + Send + 'static> Shared<T> {
    pub(crate) fn new(phases: Phases<T>, resume: ResumeStrategy, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            dispatch: JobQueue::new("dispatch"),
            ingest: JobQueue::new("ingest"),
            dispatch_checkpoint: Semaphore::new(1),
            ingest_checkpoint: Semaphore::new(1),
            cancel: CancellationToken::new(),
            gate: PauseGate::new(resume),
            phases,
            metrics,
            parked: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self, stage: Stage) -> &JobQueue<T> {
        match stage {
            Stage::Dispatch => &self.dispatch,
            Stage::Ingest => &self.ingest,
        }
    }

    fn checkpoint(&self, stage: Stage) -> &Semaphore {
        match stage {
            Stage::Dispatch => &self.dispatch_checkpoint,
            Stage::Ingest => &self.ingest_checkpoint,
        }
    }

    /// Acquire and immediately release the stage checkpoint.
    async fn touch(&self, stage: Stage) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            permit = self.checkpoint(stage).acquire() => permit.is_ok(),
        }
    }

    /// Wait at the gate and the checkpoint, then dequeue. `None` means exit.
    async fn next_job(&self, stage: Stage) -> Option<T> {
        if !self.gate.pass(&self.cancel).await {
            return None;
        }
        if !self.touch(stage).await {
            return None;
        }
        self.queue(stage).pop(&self.cancel).await
    }

    /// Entry point for new jobs.
    pub(crate) fn submit(&self, job: T) {
        self.metrics.record_submit();
        self.forward(Stage::Dispatch, job);
    }

    fn forward(&self, stage: Stage, job: T) {
        if self.cancel.is_cancelled() {
            self.park(job);
            return;
        }
        match self.queue(stage).push(job) {
            Ok(()) => {
                self.metrics.record_forward();
                trace!(to = %stage, "Job forwarded");
            }
            Err(job) => self.park(job),
        }
    }

    fn park(&self, job: T) {
        self.metrics.record_parked();
        debug!(state = %job.state(), "Pool closed, job parked");
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }

    fn discard(&self, job: T, reason: DropReason) {
        self.metrics.record_drop(reason);
        match reason {
            DropReason::Invalid(state) => warn!(%state, "Dropping job in invalid state"),
            _ => debug!(%reason, "Job dropped"),
        }
        drop(job);
    }

    async fn run_phase(&self, phase: Phase, job: &mut T) -> bool {
        let timer = ScopedTimer::new(&self.metrics, phase);
        let keep = self.phases.run(phase, job).await;
        timer.finish();
        keep
    }

    /// Send a job on after `phase` returned `keep`.
    fn route(&self, phase: Phase, keep: bool, job: T) {
        if !keep {
            self.discard(job, DropReason::Rejected);
            return;
        }
        match job.state().route_after(phase) {
            Route::Dispatch => self.forward(Stage::Dispatch, job),
            Route::Ingest => self.forward(Stage::Ingest, job),
            Route::Drop(reason) => self.discard(job, reason),
        }
    }

    /// Release the checkpoints and take every job the pool still holds.
    pub(crate) async fn drain(&self) -> Vec<T> {
        self.dispatch_checkpoint.close();
        self.ingest_checkpoint.close();

        let mut jobs = self.dispatch.drain().await;
        jobs.extend(self.ingest.drain().await);
        jobs.append(&mut self.parked.lock().unwrap_or_else(PoisonError::into_inner));
        jobs
    }
}

pub(crate) async fn dispatch_worker<T: Stateful + Send + 'static>(shared: Arc<Shared<T>>) {
    let live = shared.metrics.worker_started();
    debug!("Worker started");

    while let Some(mut job) = shared.next_job(Stage::Dispatch).await {
        match job.state() {
            JobState::Read => shared.forward(Stage::Ingest, job),
            JobState::Write => {
                let keep = shared.run_phase(Phase::Write, &mut job).await;
                shared.route(Phase::Write, keep, job);
            }
            JobState::Close => shared.discard(job, DropReason::Closed),
            state @ JobState::Run => shared.discard(job, DropReason::Invalid(state)),
        }
    }

    debug!("Worker stopped");
    live.finish();
}

pub(crate) async fn ingest_worker<T: Stateful + Send + 'static>(shared: Arc<Shared<T>>) {
    let live = shared.metrics.worker_started();
    debug!("Worker started");

    while let Some(mut job) = shared.next_job(Stage::Ingest).await {
        let keep = shared.run_phase(Phase::Read, &mut job).await;
        shared.route(Phase::Read, keep, job);
    }

    debug!("Worker stopped");
    live.finish();
}
