//! Pause gate shared by every worker of a pool.
//!
//! Pools start paused: workers are alive but must not drain their queues
//! until `join` releases the gate. The flag is a single atomic so a flip is
//! visible to all workers without allocation.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::ResumeStrategy;

pub(crate) struct PauseGate {
    paused: AtomicBool,
    strategy: ResumeStrategy,
    released: Notify,
}

impl PauseGate {
    pub(crate) fn new(strategy: ResumeStrategy) -> Self {
        Self {
            paused: AtomicBool::new(true),
            strategy,
            released: Notify::new(),
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        self.paused.store(false, Ordering::Release);
        self.released.notify_waiters();
    }

    /// Wait until the gate is open. Returns `false` if `cancel` fired first.
    pub(crate) async fn pass(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            match self.strategy {
                ResumeStrategy::Spin => tokio::task::yield_now().await,
                ResumeStrategy::Park => {
                    let released = self.released.notified();
                    tokio::pin!(released);
                    // Register before re-checking so a release between the
                    // check and the await is not missed.
                    released.as_mut().enable();
                    if !self.is_paused() {
                        return !cancel.is_cancelled();
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return false,
                        _ = &mut released => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_starts_paused() {
        let gate = PauseGate::new(ResumeStrategy::Spin);
        assert!(gate.is_paused());
        gate.release();
        assert!(!gate.is_paused());
    }

    async fn released_after_wait(strategy: ResumeStrategy) {
        let gate = Arc::new(PauseGate::new(strategy));
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.pass(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.release();
        let passed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate did not open")
            .unwrap();
        assert!(passed);
    }

    async fn cancelled_while_paused(strategy: ResumeStrategy) {
        let gate = Arc::new(PauseGate::new(strategy));
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.pass(&cancel).await })
        };

        cancel.cancel();
        let passed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel not observed")
            .unwrap();
        assert!(!passed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spin_release() {
        released_after_wait(ResumeStrategy::Spin).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_park_release() {
        released_after_wait(ResumeStrategy::Park).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spin_cancel() {
        cancelled_while_paused(ResumeStrategy::Spin).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_park_cancel() {
        cancelled_while_paused(ResumeStrategy::Park).await;
    }

    #[tokio::test]
    async fn test_open_gate_passes_immediately() {
        let gate = PauseGate::new(ResumeStrategy::Park);
        gate.release();
        assert!(gate.pass(&CancellationToken::new()).await);
    }
}
