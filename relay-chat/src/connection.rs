//! One bidirectional line stream to a single remote endpoint.
//!
//! A [`Connection`] is split on creation: the read half stays with whoever
//! runs the receive loop, while the write half lives behind an [`Outbound`]
//! handle that can be shared with the registry for broadcasts.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
};
use tracing::debug;

use crate::{
    error::{ChatError, Result},
    protocol::{read_line, write_line},
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Connection {
    id: ConnectionId,
    reader: BufReader<BoxedReader>,
    outbound: Arc<Outbound>,
}

impl Connection {
    pub fn from_tcp(id: ConnectionId, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::from_parts(id, reader, writer)
    }

    /// Builds a connection over any pair of async halves, e.g. an in-memory
    /// `tokio::io::duplex` pipe.
    pub fn from_parts<R, W>(id: ConnectionId, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            reader: BufReader::new(Box::new(reader)),
            outbound: Arc::new(Outbound::new(id, Box::new(writer))),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn outbound(&self) -> Arc<Outbound> {
        Arc::clone(&self.outbound)
    }

    pub fn is_live(&self) -> bool {
        self.outbound.is_live()
    }

    /// Blocks until a full line, end-of-stream (`Ok(None)`), or an error.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        Ok(read_line(&mut self.reader).await?)
    }

}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

/// Write half of a connection plus its liveness flag.
///
/// The writer lock is held for a whole line, so concurrent senders never
/// interleave bytes within a message. The flag only ever goes from live to
/// closed, and it is flipped while holding the writer lock: once
/// [`Outbound::close`] returns, no further line reaches the peer.
pub struct Outbound {
    id: ConnectionId,
    writer: Mutex<BoxedWriter>,
    live: AtomicBool,
}

impl Outbound {
    fn new(id: ConnectionId, writer: BoxedWriter) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if !self.is_live() {
            return Err(ChatError::Closed(self.id));
        }
        write_line(&mut *writer, line).await
    }

    /// Marks the connection closed and shuts the write half down. Returns
    /// `true` only for the call that performed the transition.
    pub async fn close(&self) -> bool {
        let mut writer = self.writer.lock().await;
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Err(err) = writer.shutdown().await {
            debug!(id = %self.id, error = ?err, "failed to shut down writer");
        }
        true
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
