use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::job::Phase;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no {0} handler: supply a base handler or an override for this phase")]
    MissingHandler(Phase),

    #[error("worker pair count must be at least 1")]
    InvalidWorkerPairs,

    #[error("the pool must be built from inside a Tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("listener failed: {0}")]
    Accept(#[source] io::Error),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("accept task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
