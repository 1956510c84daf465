//! Job State Machine
//!
//! Every unit of work that travels through the pool carries a [`JobState`]
//! tag. The engine never looks at the payload itself: it only reads the tag
//! after each phase handler returns and decides where the job goes next.
//!
//! ```text
//!   add_job ──▶ [dispatch queue] ──Read──▶ [ingest queue] ──read()──┐
//!                   ▲      │                      ▲                 │
//!                   │      └──Write──▶ write() ───┘ (state = Read)  │
//!                   └───────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which phase a job is eligible for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Reserved; the engine never assigns it and drops jobs found in it.
    Run,
    /// Waiting for inbound data.
    Read,
    /// Has something to send.
    Write,
    /// Finished; dropped by the first stage that sees it.
    Close,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// The half of the cycle a handler performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Read,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Why a job left circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The phase handler returned `false`.
    Rejected,
    /// The job reached [`JobState::Close`].
    Closed,
    /// The job carried a state that is illegal at this point.
    Invalid(JobState),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "rejected by handler"),
            Self::Closed => write!(f, "closed"),
            Self::Invalid(state) => write!(f, "invalid state {state}"),
        }
    }
}

/// Where a job goes after a phase handler kept it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Back into the queue consumed by dispatch workers.
    Dispatch,
    /// Into the queue consumed by ingest workers.
    Ingest,
    /// Out of circulation.
    Drop(DropReason),
}

impl JobState {
    /// Routing decision for a job that just finished `phase` with this state.
    ///
    /// Leaving the state unchanged means "no progress": an unchanged `Read`
    /// goes back through dispatch (which forwards it to ingest again) and an
    /// unchanged `Write` is retried by the next dispatch worker.
    pub fn route_after(self, phase: Phase) -> Route {
        match (phase, self) {
            (_, Self::Close) => Route::Drop(DropReason::Closed),
            (_, Self::Run) => Route::Drop(DropReason::Invalid(self)),
            (Phase::Read, Self::Read | Self::Write) => Route::Dispatch,
            (Phase::Write, Self::Read) => Route::Ingest,
            (Phase::Write, Self::Write) => Route::Dispatch,
        }
    }
}

/// Capability every job type must provide: a readable and writable state tag.
pub trait Stateful {
    fn state(&self) -> JobState;
    fn set_state(&mut self, state: JobState);
}

/// Resource teardown for jobs handed back by
/// [`Pool::shutdown`](crate::Pool::shutdown).
///
/// The pool only ever drops jobs; releasing sockets or files is up to the
/// owner.
#[async_trait]
pub trait Release {
    async fn release(&mut self);
}

/// A plain payload paired with a state tag.
///
/// Useful when the payload type has no natural place for the tag itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Job<P> {
    payload: P,
    state: JobState,
}

impl<P> Job<P> {
    /// Wrap `payload` in a job that starts in [`JobState::Read`].
    pub fn new(payload: P) -> Self {
        Self::with_state(payload, JobState::Read)
    }

    pub fn with_state(payload: P, state: JobState) -> Self {
        Self { payload, state }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

#[async_trait]
impl<P: Send> Release for Job<P> {
    async fn release(&mut self) {
        self.state = JobState::Close;
    }
}

impl<P> Stateful for Job<P> {
    fn state(&self) -> JobState {
        self.state
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
    }
}
