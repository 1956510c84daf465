//! Phase Handlers - The Pluggable Halves of a Job Cycle
//!
//! The pool invokes exactly one handler per phase per job. Handlers can be
//! supplied two ways:
//!
//! - **Base handler**: a type implementing [`PhaseHandler`], covering both
//!   phases (the usual choice for an embedding type such as a session pool).
//! - **Overrides**: closures passed to
//!   [`PoolBuilder::on_read`](crate::PoolBuilder::on_read) /
//!   [`on_write`](crate::PoolBuilder::on_write) that replace one phase of the
//!   base handler, or stand alone when both are given.
//!
//! # Handler Contract:
//! - Return `false` to drop the job permanently.
//! - The read phase moves `Read → Write | Close`; the write phase moves
//!   `Write → Read | Close`. Leaving the state unchanged means "no progress".
//! - Handlers own the job for the duration of the call; nobody else can see
//!   it until they return.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PoolError;
use crate::job::Phase;

/// A boxed, `Send` future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single phase handler as a shareable closure.
pub type PhaseFn<T> = Arc<dyn for<'a> Fn(&'a mut T) -> BoxFuture<'a, bool> + Send + Sync>;

/// Both phases of a job cycle, implemented by the embedding type.
#[async_trait]
pub trait PhaseHandler<T: Send>: Send + Sync + 'static {
    /// Perform the inbound side effect. Returns whether to keep the job.
    async fn read(&self, job: &mut T) -> bool;

    /// Perform the outbound side effect. Returns whether to keep the job.
    async fn write(&self, job: &mut T) -> bool;
}

/// The resolved pair of handlers a pool runs.
pub(crate) struct Phases<T> {
    read: PhaseFn<T>,
    write: PhaseFn<T>,
}

impl<T: Send + 'static> Phases<T> {
    /// Combine overrides with a base handler. Each phase takes its override
    /// if present, else the base handler's method.
    pub(crate) fn resolve(
        base: Option<Arc<dyn PhaseHandler<T>>>,
        read: Option<PhaseFn<T>>,
        write: Option<PhaseFn<T>>,
    ) -> Result<Self, PoolError> {
        let read = match (read, &base) {
            (Some(f), _) => f,
            (None, Some(base)) => from_base(Arc::clone(base), Phase::Read),
            (None, None) => return Err(PoolError::MissingHandler(Phase::Read)),
        };
        let write = match (write, &base) {
            (Some(f), _) => f,
            (None, Some(base)) => from_base(Arc::clone(base), Phase::Write),
            (None, None) => return Err(PoolError::MissingHandler(Phase::Write)),
        };
        Ok(Self { read, write })
    }

    pub(crate) async fn run(&self, phase: Phase, job: &mut T) -> bool {
        match phase {
            Phase::Read => (self.read)(job).await,
            Phase::Write => (self.write)(job).await,
        }
    }
}

/// Wrap a closure as a [`PhaseFn`].
///
/// ```rust,no_run
/// # use ringpool_core::{phase_fn, Job, JobState, Stateful};
/// let write = phase_fn(|job: &mut Job<String>| {
///     Box::pin(async move {
///         job.set_state(JobState::Read);
///         true
///     })
/// });
/// ```
pub fn phase_fn<T, F>(f: F) -> PhaseFn<T>
where
    F: for<'a> Fn(&'a mut T) -> BoxFuture<'a, bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn from_base<T: Send + 'static>(base: Arc<dyn PhaseHandler<T>>, phase: Phase) -> PhaseFn<T> {
    phase_fn(move |job| {
        let base = Arc::clone(&base);
        Box::pin(async move {
            match phase {
                Phase::Read => base.read(job).await,
                Phase::Write => base.write(job).await,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobState, Stateful};

    struct Flip;

    #[async_trait]
    impl PhaseHandler<Job<u32>> for Flip {
        async fn read(&self, job: &mut Job<u32>) -> bool {
            job.set_state(JobState::Write);
            true
        }

        async fn write(&self, job: &mut Job<u32>) -> bool {
            job.set_state(JobState::Read);
            *job.payload_mut() += 1;
            true
        }
    }

    fn reject() -> PhaseFn<Job<u32>> {
        phase_fn(|_job| Box::pin(async { false }))
    }

    fn flip() -> Option<Arc<dyn PhaseHandler<Job<u32>>>> {
        Some(Arc::new(Flip))
    }

    #[tokio::test]
    async fn test_base_handler_covers_both_phases() {
        let phases = Phases::resolve(flip(), None, None).unwrap();
        let mut job = Job::new(0u32);

        assert!(phases.run(Phase::Read, &mut job).await);
        assert_eq!(job.state(), JobState::Write);
        assert!(phases.run(Phase::Write, &mut job).await);
        assert_eq!(job.state(), JobState::Read);
        assert_eq!(*job.payload(), 1);
    }

    #[tokio::test]
    async fn test_override_replaces_one_phase() {
        let phases = Phases::resolve(flip(), Some(reject()), None).unwrap();
        let mut job = Job::new(0u32);

        assert!(!phases.run(Phase::Read, &mut job).await);
        assert_eq!(job.state(), JobState::Read);
        assert!(phases.run(Phase::Write, &mut job).await);
    }

    #[test]
    fn test_missing_phase_is_an_error() {
        let err = Phases::<Job<u32>>::resolve(None, Some(reject()), None).err();
        assert!(matches!(err, Some(PoolError::MissingHandler(Phase::Write))));

        let err = Phases::<Job<u32>>::resolve(None, None, Some(reject())).err();
        assert!(matches!(err, Some(PoolError::MissingHandler(Phase::Read))));
    }
}
