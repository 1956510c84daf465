//! Pool Metrics
//!
//! Lightweight counters for the job pool: how many jobs entered, how many
//! phases ran and for how long, where jobs were routed, and why they left.
//!
//! # Design Goals:
//! - Lock-free atomic counters, shared by every worker through an `Arc`
//! - Zero allocation on the hot path
//! - Serializable snapshots for the operator console

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::job::{DropReason, Phase};

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub jobs_submitted: AtomicU64,

    pub read_phases: AtomicU64,
    pub read_time_ns: AtomicU64,
    pub write_phases: AtomicU64,
    pub write_time_ns: AtomicU64,

    pub forwards: AtomicU64,
    pub drops_rejected: AtomicU64,
    pub drops_closed: AtomicU64,
    pub drops_invalid: AtomicU64,
    pub jobs_parked: AtomicU64,

    pub live_workers: AtomicU64,
    pub worker_faults: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_submit(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed phase handler call.
    pub fn record_phase(&self, phase: Phase, duration: Duration) {
        let (count, total) = match phase {
            Phase::Read => (&self.read_phases, &self.read_time_ns),
            Phase::Write => (&self.write_phases, &self.write_time_ns),
        };
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_forward(&self) {
        self.forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Rejected => &self.drops_rejected,
            DropReason::Closed => &self.drops_closed,
            DropReason::Invalid(_) => &self.drops_invalid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parked(&self) {
        self.jobs_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_fault(&self) {
        self.worker_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a worker as running until the returned guard is dropped.
    ///
    /// A guard dropped without [`LiveWorker::finish`] counts as a fault: the
    /// worker's future was torn down by a panic instead of leaving its loop.
    pub fn worker_started(self: &Arc<Self>) -> LiveWorker {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
        LiveWorker {
            metrics: Arc::clone(self),
            finished: false,
        }
    }

    pub fn live_workers(&self) -> u64 {
        self.live_workers.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let drops_rejected = self.drops_rejected.load(Ordering::Relaxed);
        let drops_closed = self.drops_closed.load(Ordering::Relaxed);
        let drops_invalid = self.drops_invalid.load(Ordering::Relaxed);
        PoolSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            read_phases: self.read_phases.load(Ordering::Relaxed),
            avg_read_ms: avg_duration_ms(&self.read_phases, &self.read_time_ns),
            write_phases: self.write_phases.load(Ordering::Relaxed),
            avg_write_ms: avg_duration_ms(&self.write_phases, &self.write_time_ns),
            forwards: self.forwards.load(Ordering::Relaxed),
            jobs_dropped: drops_rejected + drops_closed + drops_invalid,
            drops_rejected,
            drops_closed,
            drops_invalid,
            jobs_parked: self.jobs_parked.load(Ordering::Relaxed),
            live_workers: self.live_workers(),
            worker_faults: self.worker_faults.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.jobs_submitted,
            &self.read_phases,
            &self.read_time_ns,
            &self.write_phases,
            &self.write_time_ns,
            &self.forwards,
            &self.drops_rejected,
            &self.drops_closed,
            &self.drops_invalid,
            &self.jobs_parked,
            &self.worker_faults,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn avg_duration_ms(count: &AtomicU64, total_ns: &AtomicU64) -> f64 {
    let c = count.load(Ordering::Relaxed);
    if c == 0 {
        return 0.0;
    }
    let total = total_ns.load(Ordering::Relaxed);
    (total as f64) / (c as f64) / 1_000_000.0
}

/// Decrements the live worker count on drop.
#[derive(Debug)]
pub struct LiveWorker {
    metrics: Arc<PoolMetrics>,
    finished: bool,
}

impl LiveWorker {
    /// Normal exit.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.record_worker_fault();
        }
        self.metrics.live_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub jobs_submitted: u64,
    pub read_phases: u64,
    pub avg_read_ms: f64,
    pub write_phases: u64,
    pub avg_write_ms: f64,
    pub forwards: u64,
    pub jobs_dropped: u64,
    pub drops_rejected: u64,
    pub drops_closed: u64,
    pub drops_invalid: u64,
    pub jobs_parked: u64,
    pub live_workers: u64,
    pub worker_faults: u64,
}

impl PoolSnapshot {
    /// Render the snapshot as a short multi-line report.
    pub fn report(&self) -> String {
        format!(
            "jobs:    submitted={} dropped={} (rejected={} closed={} invalid={}) parked={}\n\
             phases:  read={} (avg {:.3} ms) write={} (avg {:.3} ms) forwards={}\n\
             workers: live={} faults={}",
            self.jobs_submitted,
            self.jobs_dropped,
            self.drops_rejected,
            self.drops_closed,
            self.drops_invalid,
            self.jobs_parked,
            self.read_phases,
            self.avg_read_ms,
            self.write_phases,
            self.avg_write_ms,
            self.forwards,
            self.live_workers,
            self.worker_faults,
        )
    }
}

/// Times one phase handler call.
///
/// Only [`finish`](Self::finish) records. A timer dropped without it, such as
/// one torn down with a panicking handler's future, leaves the counters alone.
pub struct ScopedTimer<'a> {
    start: Instant,
    metrics: &'a PoolMetrics,
    phase: Phase,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(metrics: &'a PoolMetrics, phase: Phase) -> Self {
        Self {
            start: Instant::now(),
            metrics,
            phase,
        }
    }

    pub fn finish(self) {
        self.metrics.record_phase(self.phase, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;

    #[test]
    fn test_metrics_creation() {
        let metrics = PoolMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 0);
        assert_eq!(snapshot.read_phases, 0);
        assert_eq!(snapshot.avg_read_ms, 0.0);
    }

    #[test]
    fn test_record_phases() {
        let metrics = PoolMetrics::new();
        metrics.record_phase(Phase::Read, Duration::from_millis(100));
        metrics.record_phase(Phase::Read, Duration::from_millis(200));
        metrics.record_phase(Phase::Write, Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.read_phases, 2);
        assert_eq!(snapshot.avg_read_ms, 150.0);
        assert_eq!(snapshot.write_phases, 1);
        assert_eq!(snapshot.avg_write_ms, 10.0);
    }

    #[test]
    fn test_drop_reasons_are_split() {
        let metrics = PoolMetrics::new();
        metrics.record_drop(DropReason::Rejected);
        metrics.record_drop(DropReason::Closed);
        metrics.record_drop(DropReason::Closed);
        metrics.record_drop(DropReason::Invalid(JobState::Run));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_dropped, 4);
        assert_eq!(snapshot.drops_rejected, 1);
        assert_eq!(snapshot.drops_closed, 2);
        assert_eq!(snapshot.drops_invalid, 1);
    }

    #[test]
    fn test_live_worker_guard() {
        let metrics = PoolMetrics::new();
        let a = metrics.worker_started();
        let b = metrics.worker_started();
        assert_eq!(metrics.live_workers(), 2);
        a.finish();
        assert_eq!(metrics.live_workers(), 1);
        b.finish();
        assert_eq!(metrics.live_workers(), 0);
        assert_eq!(metrics.snapshot().worker_faults, 0);
    }

    #[test]
    fn test_unfinished_worker_counts_as_fault() {
        let metrics = PoolMetrics::new();
        drop(metrics.worker_started());
        assert_eq!(metrics.live_workers(), 0);
        assert_eq!(metrics.snapshot().worker_faults, 1);
    }

    #[test]
    fn test_panicking_worker_counts_as_fault() {
        let metrics = PoolMetrics::new();
        let m = Arc::clone(&metrics);
        let result = std::thread::spawn(move || {
            let _live = m.worker_started();
            panic!("handler blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(metrics.live_workers(), 0);
        assert_eq!(metrics.snapshot().worker_faults, 1);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = PoolMetrics::new();
        metrics.record_submit();
        metrics.record_forward();
        metrics.record_phase(Phase::Write, Duration::from_millis(5));
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 0);
        assert_eq!(snapshot.forwards, 0);
        assert_eq!(snapshot.write_phases, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = PoolMetrics::new();
        metrics.record_submit();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["jobs_submitted"], 1);
        assert_eq!(json["worker_faults"], 0);
    }

    #[test]
    fn test_report_mentions_counters() {
        let metrics = PoolMetrics::new();
        metrics.record_submit();
        let report = metrics.snapshot().report();
        assert!(report.contains("submitted=1"));
        assert!(report.contains("faults=0"));
    }

    #[tokio::test]
    async fn test_scoped_timer() {
        let metrics = PoolMetrics::new();
        let timer = ScopedTimer::new(&metrics, Phase::Read);
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.finish();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.read_phases, 1);
        assert!(snapshot.avg_read_ms >= 10.0);
    }

    #[test]
    fn test_abandoned_timer_records_nothing() {
        let metrics = PoolMetrics::new();
        drop(ScopedTimer::new(&metrics, Phase::Write));
        assert_eq!(metrics.snapshot().write_phases, 0);
    }
}
