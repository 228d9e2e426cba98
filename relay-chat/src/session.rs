//! Participant side of the chat: one connection to the relay.
//!
//! A [`PeerSession`] owns the write half and sends locally typed lines,
//! while a background task reads lines from the relay and hands them to the
//! view. There is no reconnection: once the connection fails the session is
//! over.

use std::{io, sync::Arc};

use tokio::{net::TcpStream, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    connection::{Connection, ConnectionId, Outbound},
    error::{ChatError, Result},
    protocol::Message,
    view::{Alignment, ChatView, StyleHint},
};

pub const DEFAULT_NAME: &str = "Client";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the relay.
    pub server: String,
    /// Origin label prefixed to every line this participant sends.
    pub name: String,
}

pub struct PeerSession {
    label: String,
    outbound: Arc<Outbound>,
    view: Arc<dyn ChatView>,
    receiver: Option<JoinHandle<Result<()>>>,
}

impl PeerSession {
    pub async fn connect(config: &SessionConfig, view: Arc<dyn ChatView>) -> Result<Self> {
        let stream = TcpStream::connect(config.server.as_str())
            .await
            .map_err(|source| ChatError::Connect {
                addr: config.server.clone(),
                source,
            })?;
        info!(server = %config.server, name = %config.name, "connected to relay");

        let connection = Connection::from_tcp(ConnectionId::new(0), stream);
        Ok(Self::start(connection, config.name.clone(), view))
    }

    /// Starts the receive loop over an already established connection.
    pub fn start(connection: Connection, label: impl Into<String>, view: Arc<dyn ChatView>) -> Self {
        let outbound = connection.outbound();
        let receiver = tokio::spawn(run_receive_loop(connection, Arc::clone(&view)));
        Self {
            label: label.into(),
            outbound,
            view,
            receiver: Some(receiver),
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_live()
    }

    /// Sends `body` as `<label>: <body>` and renders it as an own message.
    /// Empty input is ignored.
    pub async fn send(&self, body: &str) -> Result<()> {
        if body.is_empty() {
            return Ok(());
        }
        let message = Message::chat(self.label.as_str(), body)?;
        self.outbound.send_line(message.as_line()).await?;
        self.view
            .display_message(body, Alignment::Right, StyleHint::Own);
        Ok(())
    }

    /// Announces departure, renders it locally and closes the connection.
    pub async fn leave(&mut self) -> Result<()> {
        let message = Message::leave(self.label.as_str())?;
        let sent = self.outbound.send_line(message.as_line()).await;
        if sent.is_ok() {
            self.view
                .display_message(message.as_line(), Alignment::Center, StyleHint::Leave);
        }
        self.close().await;
        sent
    }

    /// Closes the connection without announcing anything.
    pub async fn close(&mut self) {
        self.outbound.close().await;
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }

    /// Resolves when the receive loop ends: `Ok` if the relay closed the
    /// stream, `Err` on a transport failure. Safe to use inside `select!`.
    pub async fn closed(&mut self) -> Result<()> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(());
        };
        let outcome = receiver.await;
        self.receiver = None;
        match outcome {
            Ok(result) => result,
            Err(err) => Err(ChatError::Io(io::Error::other(err))),
        }
    }
}

async fn run_receive_loop(mut connection: Connection, view: Arc<dyn ChatView>) -> Result<()> {
    while let Some(line) = connection.read_line().await? {
        let message = Message::parse(&line);
        on_message_received(
            view.as_ref(),
            message.origin(),
            message.body(),
            message.is_leave(),
        );
    }
    debug!("relay closed the stream");
    view.display_message(
        "relay closed the connection",
        Alignment::Center,
        StyleHint::Notice,
    );
    Ok(())
}

/// Renders a message received from the relay. A leave notice's body is the
/// whole notice and is shown centred; chat bodies are attributed to their
/// origin when the sender supplied one.
pub fn on_message_received(view: &dyn ChatView, origin: Option<&str>, body: &str, is_leave: bool) {
    if is_leave {
        view.display_message(body, Alignment::Center, StyleHint::Leave);
        return;
    }
    let text = match origin {
        Some(origin) => format!("{origin}: {body}"),
        None => body.to_string(),
    };
    view.display_message(&text, Alignment::Left, StyleHint::Other);
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncWriteExt, BufReader, DuplexStream},
        sync::mpsc::UnboundedReceiver,
    };

    use super::*;
    use crate::{
        protocol::read_line,
        view::{ChannelView, DisplayEvent},
    };

    fn session_over_pipe(label: &str) -> (PeerSession, DuplexStream, UnboundedReceiver<DisplayEvent>) {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let connection = Connection::from_parts(ConnectionId::new(0), reader, writer);
        let (view, events) = ChannelView::new();
        (PeerSession::start(connection, label, Arc::new(view)), remote, events)
    }

    #[tokio::test]
    async fn send_prefixes_label_and_echoes_locally() {
        let (session, remote, mut events) = session_over_pipe("Client");
        session.send("hello").await.expect("send");

        let mut remote = BufReader::new(remote);
        assert_eq!(
            read_line(&mut remote).await.expect("read").as_deref(),
            Some("Client: hello")
        );
        let echo = events.recv().await.expect("echo");
        assert_eq!(echo.text, "hello");
        assert_eq!(echo.style, StyleHint::Own);
        assert_eq!(echo.alignment, Alignment::Right);
    }

    #[tokio::test]
    async fn received_lines_are_classified() {
        let (mut session, mut remote, mut events) = session_over_pipe("Client");
        remote.write_all(b"Server: hi\n").await.expect("write");
        remote
            .write_all(b"Client2 has left the chat room\n")
            .await
            .expect("write");
        remote.shutdown().await.expect("shutdown");

        let chat = events.recv().await.expect("chat");
        assert_eq!(chat.text, "Server: hi");
        assert_eq!(chat.style, StyleHint::Other);

        let leave = events.recv().await.expect("leave");
        assert_eq!(leave.text, "Client2 has left the chat room");
        assert_eq!(leave.style, StyleHint::Leave);
        assert_eq!(leave.alignment, Alignment::Center);

        session.closed().await.expect("relay closed cleanly");
        let notice = events.recv().await.expect("notice");
        assert_eq!(notice.style, StyleHint::Notice);
    }

    #[test]
    fn received_message_is_attributed_to_its_origin() {
        let (view, mut events) = ChannelView::new();

        on_message_received(&view, Some("alice"), "hi: there", false);
        on_message_received(&view, None, "no origin", false);
        on_message_received(&view, Some("bob"), "bob has left the chat room", true);

        let chat = events.try_recv().expect("chat");
        assert_eq!(chat.text, "alice: hi: there");
        assert_eq!(chat.alignment, Alignment::Left);
        assert_eq!(events.try_recv().expect("bare").text, "no origin");
        let leave = events.try_recv().expect("leave");
        assert_eq!(leave.text, "bob has left the chat room");
        assert_eq!(leave.style, StyleHint::Leave);
    }

    #[tokio::test]
    async fn leave_sends_notice_and_closes() {
        let (mut session, remote, mut events) = session_over_pipe("Client2");
        session.leave().await.expect("leave");
        assert!(!session.is_open());

        let mut remote = BufReader::new(remote);
        assert_eq!(
            read_line(&mut remote).await.expect("read").as_deref(),
            Some("Client2 has left the chat room")
        );
        assert_eq!(read_line(&mut remote).await.expect("eof"), None);

        let rendered = events.recv().await.expect("leave rendered");
        assert_eq!(rendered.style, StyleHint::Leave);

        let err = session.send("still here?").await.expect_err("closed");
        assert!(matches!(err, ChatError::Closed(_)));
    }

    #[tokio::test]
    async fn newline_in_body_is_rejected_before_sending() {
        let (session, _remote, mut events) = session_over_pipe("Client");
        let err = session.send("two\nlines").await.expect_err("rejected");
        assert!(err.is_protocol());
        assert!(events.try_recv().is_err());
    }
}
