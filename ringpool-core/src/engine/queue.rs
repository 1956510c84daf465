//! Unbounded multi-consumer job queue.
//!
//! Tokio's unbounded channel has a single receiver; several workers of the
//! same stage share it through an async mutex. Only one worker waits inside
//! `recv` at a time, the others queue on the lock, which gives FIFO hand-off
//! without busy polling.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) struct JobQueue<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> JobQueue<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue without blocking. Gives the job back if the queue was drained.
    pub(crate) fn push(&self, job: T) -> Result<(), T> {
        self.tx.send(job).map_err(|mpsc::error::SendError(job)| {
            warn!(queue = self.name, "Queue already drained, job not enqueued");
            job
        })
    }

    /// Dequeue the next job, or `None` once `cancel` fires.
    ///
    /// Cancellation wins over a ready job: nothing is dequeued after the
    /// token has been cancelled.
    pub(crate) async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = rx.recv() => job,
        }
    }

    /// Close the queue and take every job still in it.
    pub(crate) async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new("test");
        let cancel = CancellationToken::new();
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.pop(&cancel).await, Some(0));
        assert_eq!(queue.pop(&cancel).await, Some(1));
        assert_eq!(queue.pop(&cancel).await, Some(2));
    }

    #[tokio::test]
    async fn test_cancel_beats_ready_job() {
        let queue = JobQueue::new("test");
        let cancel = CancellationToken::new();
        queue.push(1).unwrap();
        cancel.cancel();
        assert_eq!(queue.pop(&cancel).await, None);
        assert_eq!(queue.drain().await, vec![1]);
    }

    #[tokio::test]
    async fn test_cancel_wakes_blocked_pop() {
        let queue = Arc::new(JobQueue::<u32>::new("test"));
        let cancel = CancellationToken::new();

        let popper = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let popped = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop did not observe cancellation")
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_consumers_see_each_job_once() {
        let queue = Arc::new(JobQueue::new("test"));
        let cancel = CancellationToken::new();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let seen_tx = seen_tx.clone();
            consumers.push(tokio::spawn(async move {
                while let Some(job) = queue.pop(&cancel).await {
                    let _ = seen_tx.send(job);
                }
            }));
        }
        drop(seen_tx);

        for i in 0..200u32 {
            queue.push(i).unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 200 {
            seen.push(seen_rx.recv().await.unwrap());
        }
        cancel.cancel();
        for consumer in consumers {
            consumer.await.unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_push_after_drain_gives_job_back() {
        let queue = JobQueue::new("test");
        queue.push(1).unwrap();
        assert_eq!(queue.drain().await, vec![1]);
        assert_eq!(queue.push(2), Err(2));
    }
}
