//! Ringpool Core - Two-Stage Job Pool for Stateful Sessions
//!
//! Multiplexes many long-lived, stateful units of work over a fixed set of
//! worker tasks. Each unit alternates between a read phase and a write phase;
//! a *dispatch* stage branches on the unit's state and performs writes, an
//! *ingest* stage performs reads. No task is ever dedicated to one unit.
//!
//! # Layout:
//! - [`engine`]: the [`Pool`], its queues, pause gate and worker loops
//! - [`job`] / [`handler`]: the state tag and the pluggable phase handlers
//! - [`session`] / [`processor`] / [`server`]: a TCP echo service built on it
//! - [`config`] / [`cli`] / [`stats`]: the ambient plumbing

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod job;
pub mod processor;
pub mod server;
pub mod session;
pub mod stats;

pub use config::{PoolConfig, ResumeStrategy, ServerConfig};
pub use engine::{JoinSummary, Pool, PoolBuilder, PoolCloser, Stage};
pub use error::{ConfigError, PoolError, ServerError};
pub use handler::{phase_fn, BoxFuture, PhaseFn, PhaseHandler};
pub use job::{DropReason, Job, JobState, Phase, Release, Route, Stateful};
pub use processor::{EchoProcessor, Processor, SessionHandler};
pub use server::{ServerReport, StopHandle, TcpServer};
pub use session::{ReadStatus, Session, SessionBuffer};
pub use stats::{PoolMetrics, PoolSnapshot};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug or info.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_once() {
        assert!(init_tracing(false).is_ok());
        assert!(init_tracing(true).is_err());
    }
}
