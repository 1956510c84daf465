//! Ringpool Pipeline Demo
//!
//! Runs a handful of in-memory "conversations" through the pool without any
//! sockets. Each job carries a list of lines to "receive"; the read phase
//! takes the next line, the write phase "sends" an uppercased answer. A job
//! closes itself once its script is exhausted.

use std::collections::VecDeque;
use std::time::Duration;

use ringpool_core::{init_tracing, Job, JobState, Pool, Stateful};

struct Script {
    name: &'static str,
    lines: VecDeque<&'static str>,
    current: Option<&'static str>,
}

impl Script {
    fn new(name: &'static str, lines: &[&'static str]) -> Job<Script> {
        Job::new(Script {
            name,
            lines: lines.iter().copied().collect(),
            current: None,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(false)?;

    let pool = Pool::<Job<Script>>::builder()
        .worker_pairs(Some(2))
        .on_read(|job| {
            Box::pin(async move {
                let script = job.payload_mut();
                match script.lines.pop_front() {
                    Some(line) => {
                        script.current = Some(line);
                        job.set_state(JobState::Write);
                    }
                    None => job.set_state(JobState::Close),
                }
                true
            })
        })
        .on_write(|job| {
            Box::pin(async move {
                let script = job.payload_mut();
                if let Some(line) = script.current.take() {
                    println!("[{}] {} -> {}", script.name, line, line.to_uppercase());
                }
                job.set_state(JobState::Read);
                true
            })
        })
        .build()?;

    pool.add_job(Script::new("alice", &["hello", "how are you", "bye"]));
    pool.add_job(Script::new("bob", &["ping", "ping again"]));
    pool.add_job(Script::new("carol", &["one", "two", "three", "four"]));

    let metrics = pool.metrics();
    let closer = pool.closer();
    tokio::spawn(async move {
        while metrics.snapshot().drops_closed < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        closer.close();
    });

    let summary = pool.join().await;
    println!();
    println!("workers exited: {}, faulted: {}", summary.exited, summary.faulted);
    println!("{}", pool.stats().report());
    Ok(())
}
