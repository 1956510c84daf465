//! Configuration for the pool and the echo server.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, `RINGPOOL_*` environment variables, and finally the
//! command line (applied by the binary).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PoolError};

pub const DEFAULT_PORT: u16 = 9999;

/// Size of each session's receive buffer.
pub const DEFAULT_READ_BUFFER: usize = u16::MAX as usize;

pub const ENV_PORT: &str = "RINGPOOL_PORT";
pub const ENV_BIND: &str = "RINGPOOL_BIND";
pub const ENV_WORKER_PAIRS: &str = "RINGPOOL_WORKER_PAIRS";

/// How paused workers wait for `join`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStrategy {
    /// Busy-loop, yielding to the scheduler between checks.
    #[default]
    Spin,
    /// Sleep until released or cancelled.
    Park,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of dispatch/ingest worker pairs; `None` picks a default from
    /// the available parallelism.
    pub worker_pairs: Option<usize>,
    pub resume: ResumeStrategy,
}

impl PoolConfig {
    /// Resolve the configured pair count.
    pub fn resolved_pairs(&self) -> Result<usize, PoolError> {
        match self.worker_pairs {
            None => Ok(default_worker_pairs()),
            Some(0) => Err(PoolError::InvalidWorkerPairs),
            Some(n) => Ok(n),
        }
    }
}

/// Half the available hardware parallelism, at least one.
pub fn default_worker_pairs() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Receive buffer size per session, in bytes.
    pub read_buffer: usize,
    /// Longest time a read phase waits for data before reporting no
    /// progress. The wait holds an ingest worker, so keep it at zero unless
    /// sessions are few.
    pub idle_wait_ms: u64,
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            read_buffer: DEFAULT_READ_BUFFER,
            idle_wait_ms: 0,
            pool: PoolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply `RINGPOOL_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PORT) {
            self.port = parse_env(ENV_PORT, value)?;
        }
        if let Some(value) = lookup(ENV_BIND) {
            self.bind = parse_env(ENV_BIND, value)?;
        }
        if let Some(value) = lookup(ENV_WORKER_PAIRS) {
            self.pool.worker_pairs = Some(parse_env(ENV_WORKER_PAIRS, value)?);
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value,
    })
}
