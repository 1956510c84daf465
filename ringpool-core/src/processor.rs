//! Application protocol on top of sessions.
//!
//! [`SessionHandler`] does the socket side of the read phase and hands
//! complete reads to a [`Processor`], which decides what to answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::handler::PhaseHandler;
use crate::job::{JobState, Stateful};
use crate::session::{ReadStatus, Session};

/// What to do with a session's data. Both methods return whether to keep
/// the session.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Called after a read put data in the session buffer.
    async fn process_read(&self, session: &mut Session) -> bool;

    async fn process_write(&self, session: &mut Session) -> bool;
}

/// Answers every message with `"Echo: "` and the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process_read(&self, session: &mut Session) -> bool {
        let text = session.take_text();
        debug!(%session, %text, "Received");
        session.queue_reply(format!("Echo: {text}"));
        session.set_state(JobState::Write);
        true
    }

    async fn process_write(&self, session: &mut Session) -> bool {
        if let Some(reply) = session.take_reply() {
            if let Err(e) = session.send(&reply).await {
                warn!(%session, error = %e, "Send failed, dropping session");
                return false;
            }
        }
        session.set_state(JobState::Read);
        true
    }
}

/// Pool handler driving sessions through a [`Processor`].
pub struct SessionHandler {
    processor: Arc<dyn Processor>,
    idle: Duration,
}

impl SessionHandler {
    /// `idle` bounds how long a read phase waits for data; zero never waits.
    pub fn new(processor: Arc<dyn Processor>, idle: Duration) -> Self {
        Self { processor, idle }
    }
}

#[async_trait]
impl PhaseHandler<Session> for SessionHandler {
    async fn read(&self, session: &mut Session) -> bool {
        match session.fill(self.idle).await {
            Ok(ReadStatus::Data(n)) => {
                trace!(%session, bytes = n, "Read");
                self.processor.process_read(session).await
            }
            Ok(ReadStatus::Pending) => true,
            Ok(ReadStatus::Closed) => {
                debug!(%session, "Peer closed connection");
                false
            }
            Err(e) => {
                warn!(%session, error = %e, "Read failed, dropping session");
                false
            }
        }
    }

    async fn write(&self, session: &mut Session) -> bool {
        self.processor.process_write(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, Session) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (client, Session::new(7, stream, peer, 1024))
    }

    #[derive(Default)]
    struct Counting {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl Processor for Counting {
        async fn process_read(&self, session: &mut Session) -> bool {
            self.reads.fetch_add(1, Ordering::SeqCst);
            session.set_state(JobState::Write);
            true
        }

        async fn process_write(&self, session: &mut Session) -> bool {
            session.set_state(JobState::Read);
            true
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (mut client, mut session) = pair().await;
        let handler = SessionHandler::new(Arc::new(EchoProcessor), Duration::from_secs(1));

        client.write_all(b"hi").await.unwrap();
        assert!(handler.read(&mut session).await);
        assert_eq!(session.state(), JobState::Write);
        assert!(session.buffer().is_empty());

        assert!(handler.write(&mut session).await);
        assert_eq!(session.state(), JobState::Read);

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"Echo: hi");
    }

    #[tokio::test]
    async fn test_idle_read_keeps_session() {
        let (_client, mut session) = pair().await;
        let counting = Arc::new(Counting::default());
        let handler = SessionHandler::new(counting.clone(), Duration::from_millis(10));

        assert!(handler.read(&mut session).await);
        assert_eq!(session.state(), JobState::Read);
        assert_eq!(counting.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_peer_skips_processor() {
        let (client, mut session) = pair().await;
        let counting = Arc::new(Counting::default());
        let handler = SessionHandler::new(counting.clone(), Duration::from_secs(1));

        drop(client);
        assert!(!handler.read(&mut session).await);
        assert_eq!(counting.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_without_reply_goes_back_to_read() {
        let (_client, mut session) = pair().await;
        session.set_state(JobState::Write);
        assert!(EchoProcessor.process_write(&mut session).await);
        assert_eq!(session.state(), JobState::Read);
    }
}
