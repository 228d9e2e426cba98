use std::{io, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionId;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The relay address could not be reached.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The relay could not start listening.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A read or write failed on an established connection.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("no line received within {0:?}")]
    IdleTimeout(Duration),

    /// Outbound text would break the one-line-per-message framing.
    #[error("message text must not contain a line break")]
    EmbeddedNewline,
}

impl ChatError {
    /// Errors raised before any connection was established.
    pub fn is_startup(&self) -> bool {
        matches!(self, ChatError::Connect { .. } | ChatError::Bind { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ChatError::EmbeddedNewline)
    }
}
