//! Ringpool - TCP Echo Server on a Two-Stage Job Pool
//!
//! Every connection is a session job: the ingest stage reads what the client
//! sent, the dispatch stage writes `Echo: <text>` back.
//!
//! Console commands on stdin: `stop`, `stats`, `reset` (zero the counters).

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ringpool_core::cli::Cli;
use ringpool_core::{init_tracing, EchoProcessor, Pool, ServerConfig, Session, StopHandle, TcpServer};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Forward stdin lines from a plain thread. A blocking read cannot be
/// cancelled, so the thread is left detached and dies with the process.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn console(stop: StopHandle, pool: Arc<Pool<Session>>) {
    let mut lines = stdin_lines();
    while let Some(line) = lines.recv().await {
        match line.trim() {
            "" => {}
            "stop" => {
                stop.stop();
                return;
            }
            "stats" => match serde_json::to_string_pretty(&pool.stats()) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "Could not render stats"),
            },
            "reset" => {
                pool.metrics().reset();
                info!("Pool counters reset");
            }
            other => println!("unknown command '{other}' (try 'stats', 'reset' or 'stop')"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    let server = TcpServer::bind(&config, Arc::new(EchoProcessor))
        .await
        .with_context(|| format!("failed to start server on {}", config.addr()))?;
    println!(
        "ringpool {} listening on {}",
        env!("CARGO_PKG_VERSION"),
        server.local_addr()
    );

    let stop = server.stop_handle();
    tokio::spawn(console(stop.clone(), server.pool()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            stop.stop();
        }
    });

    let report = server.run().await.context("server terminated abnormally")?;
    if report.summary.faulted > 0 {
        warn!(faulted = report.summary.faulted, "Some workers died during the run");
    }
    println!(
        "accepted {} connection(s), released {} open session(s)",
        report.accepted, report.released
    );
    Ok(())
}
