//! TCP Session - One Connected Client as a Pool Job
//!
//! A [`Session`] owns its socket, a fixed receive buffer, and the reply
//! queued for the next write phase. It moves through the pool by value, so
//! at most one worker touches the socket at a time.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::job::{JobState, Release, Stateful};

/// Outcome of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes are now in the buffer.
    Data(usize),
    /// Nothing to read right now. Not an error.
    Pending,
    /// The peer closed its side.
    Closed,
}

/// Fixed-capacity receive buffer holding the most recent read.
#[derive(Debug)]
pub struct SessionBuffer {
    data: Box<[u8]>,
    last: Option<usize>,
}

impl SessionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            last: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Size of the last read, zero before any read.
    pub fn len(&self) -> usize {
        self.last.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    /// True when the last read returned zero bytes.
    pub fn has_closed(&self) -> bool {
        self.last == Some(0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// The last read as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    fn spare(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn set_filled(&mut self, n: usize) {
        self.last = Some(n);
    }
}

pub struct Session {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    state: JobState,
    buffer: SessionBuffer,
    reply: Option<String>,
}

impl Session {
    /// Wrap an accepted connection. New sessions wait for input.
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, buffer_size: usize) -> Self {
        Self {
            id,
            peer,
            stream,
            state: JobState::Read,
            buffer: SessionBuffer::with_capacity(buffer_size),
            reply: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    /// Read whatever is available without blocking.
    ///
    /// With a zero `idle` an empty socket costs a single syscall. A non-zero
    /// `idle` first waits up to that long for readiness, holding the calling
    /// worker the whole time.
    pub async fn fill(&mut self, idle: Duration) -> io::Result<ReadStatus> {
        if !idle.is_zero() {
            match tokio::time::timeout(idle, self.stream.readable()).await {
                Err(_) => return Ok(ReadStatus::Pending),
                Ok(ready) => ready?,
            }
        }

        match self.stream.try_read(self.buffer.spare()) {
            Ok(0) => {
                self.buffer.set_filled(0);
                Ok(ReadStatus::Closed)
            }
            Ok(n) => {
                self.buffer.set_filled(n);
                Ok(ReadStatus::Data(n))
            }
            // Readiness can be spurious.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadStatus::Pending),
            Err(e) => Err(e),
        }
    }

    pub fn last_text(&self) -> Cow<'_, str> {
        self.buffer.text()
    }

    /// Take the last read as text and empty the buffer.
    pub fn take_text(&mut self) -> String {
        let text = self.buffer.text().into_owned();
        self.buffer.clear();
        text
    }

    pub fn queue_reply(&mut self, reply: impl Into<String>) {
        self.reply = Some(reply.into());
    }

    pub fn take_reply(&mut self) -> Option<String> {
        self.reply.take()
    }

    pub async fn send(&mut self, text: &str) -> io::Result<()> {
        self.stream.write_all(text.as_bytes()).await
    }
}

impl Stateful for Session {
    fn state(&self) -> JobState {
        self.state
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
    }
}

#[async_trait]
impl Release for Session {
    /// Shut down the write half. The peer may already be gone.
    async fn release(&mut self) {
        let _ = self.stream.shutdown().await;
        self.state = JobState::Close;
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{} ({})", self.id, self.peer)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("last_read", &self.buffer.len())
            .field("reply_queued", &self.reply.is_some())
            .finish()
    }
}
