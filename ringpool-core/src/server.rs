//! TCP Acceptor - Feeds Connections into the Session Pool
//!
//! The server owns a listener and a [`Pool<Session>`]. Every accepted
//! connection becomes a [`Session`] in the read state; from then on the pool
//! alone drives it.
//!
//! # Lifecycle:
//! 1. [`TcpServer::bind`] binds the listener and builds the (paused) pool
//! 2. [`TcpServer::run`] starts accepting and releases the pool
//! 3. [`StopHandle::stop`] closes both; `run` then releases every session the
//!    pool still holds and returns a [`ServerReport`]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::engine::{JoinSummary, Pool, PoolCloser};
use crate::error::ServerError;
use crate::job::Release;
use crate::processor::{Processor, SessionHandler};
use crate::session::Session;

/// What a finished server did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReport {
    pub accepted: u64,
    /// Sessions still open at shutdown and released by the server.
    pub released: usize,
    pub summary: JoinSummary,
}

/// Stops a running server from another task. Idempotent.
#[derive(Debug, Clone)]
pub struct StopHandle {
    accept: CancellationToken,
    pool: PoolCloser,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.accept.is_cancelled() {
            info!("Stopping server");
        }
        self.accept.cancel();
        self.pool.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.accept.is_cancelled()
    }
}

pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: Arc<Pool<Session>>,
    accept: CancellationToken,
    read_buffer: usize,
}

impl TcpServer {
    /// Bind `config.bind:config.port` and build the session pool.
    ///
    /// Must be called inside a Tokio runtime. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(
        config: &ServerConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self, ServerError> {
        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let pool = Pool::builder()
            .config(config.pool.clone())
            .handler(SessionHandler::new(processor, config.idle_wait()))
            .build()?;

        debug!(%local_addr, pairs = pool.worker_pairs(), "Server bound");
        Ok(Self {
            listener,
            local_addr,
            pool: Arc::new(pool),
            accept: CancellationToken::new(),
            read_buffer: config.read_buffer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> Arc<Pool<Session>> {
        Arc::clone(&self.pool)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            accept: self.accept.clone(),
            pool: self.pool.closer(),
        }
    }

    /// Accept connections until stopped, then tear everything down.
    ///
    /// Fails with [`ServerError::Accept`] if the listener broke; sessions are
    /// released either way.
    pub async fn run(self) -> Result<ServerReport, ServerError> {
        let Self {
            listener,
            local_addr,
            pool,
            accept,
            read_buffer,
        } = self;
        info!(addr = %local_addr, workers = pool.worker_count(), "Server listening");

        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&pool),
            accept.clone(),
            read_buffer,
        ));

        let summary = pool.join().await;
        // The pool may have been closed by a handler rather than the handle.
        accept.cancel();
        let accepted = acceptor.await;

        let leftovers = pool.shutdown().await;
        let released = leftovers.len();
        for mut session in leftovers {
            debug!(%session, "Releasing session");
            session.release().await;
        }

        let accepted = accepted??;
        info!(accepted, released, faulted = summary.faulted, "Server stopped");
        Ok(ServerReport {
            accepted,
            released,
            summary,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    pool: Arc<Pool<Session>>,
    stop: CancellationToken,
    read_buffer: usize,
) -> Result<u64, ServerError> {
    let mut accepted = 0u64;
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            conn = listener.accept() => match conn {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Accept failed, stopping server");
                    pool.close();
                    return Err(ServerError::Accept(e));
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "Could not disable Nagle");
        }
        accepted += 1;
        let session = Session::new(accepted, stream, peer, read_buffer);
        debug!(%session, "Accepted connection");
        pool.add_job(session);
    }
    Ok(accepted)
}
