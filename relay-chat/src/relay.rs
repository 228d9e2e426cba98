//! Server side of the chat: accepts participants and fans their lines out.
//!
//! Every accepted socket becomes a [`Connection`] registered in the shared
//! [`ParticipantRegistry`] and served by its own task. A line read from one
//! participant is written to all the others. The relay operator takes part
//! through a [`RelayHandle`]: its messages go to everyone.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId},
    error::{ChatError, Result},
    protocol::{Message, MessageKind},
    registry::{BroadcastReport, ParticipantRegistry},
    view::{Alignment, ChatView, StyleHint},
};

pub const DEFAULT_LABEL: &str = "Server";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Origin label attached to lines typed by the relay operator.
    pub label: String,
    /// Drop a participant that sends nothing for this long. `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            idle_timeout: None,
        }
    }
}

pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Relay {
    pub async fn bind(addr: SocketAddr, config: RelayConfig, view: Arc<dyn ChatView>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ChatError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::new(listener, config, view))
    }

    pub fn new(listener: TcpListener, config: RelayConfig, view: Arc<dyn ChatView>) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new(config, view)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accepts participants until `shutdown` resolves or the operator leaves,
    /// then closes every connection.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        let mut stopped = state.stop_signal();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                _ = stopped.wait_for(|stopped| *stopped) => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        handle_shutdown(&state).await;
        Ok(())
    }
}

async fn handle_shutdown(state: &Arc<RelayState>) {
    state.stop();
    let closed = state.registry.close_all().await;
    info!(closed, "relay shutting down");
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, state: &Arc<RelayState>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        handle_connection(stream, peer, state).await;
    });
}

struct RelayState {
    registry: ParticipantRegistry,
    view: Arc<dyn ChatView>,
    config: RelayConfig,
    next_id: AtomicU64,
    stopped: watch::Sender<bool>,
}

impl RelayState {
    fn new(config: RelayConfig, view: Arc<dyn ChatView>) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            registry: ParticipantRegistry::new(),
            view,
            config,
            next_id: AtomicU64::new(1),
            stopped,
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }

    fn stop(&self) {
        self.stopped.send_replace(true);
    }

    /// Operator-only status line; participants never see these.
    fn notify(&self, text: &str) {
        self.view
            .display_message(text, Alignment::Left, StyleHint::Notice);
    }
}

/// Why a participant's receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    /// Sent an explicit leave notice.
    Left,
    /// End-of-stream without a leave notice.
    Disconnected,
    /// Removed from the registry after a failed write.
    Dropped,
    /// The relay itself is shutting down.
    Shutdown,
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<RelayState>) {
    let id = state.next_id();
    let mut connection = Connection::from_tcp(id, stream);
    state.registry.add(connection.outbound()).await;
    info!(%id, %peer, "participant connected");
    state.notify(&format!("participant {id} connected from {peer}"));

    let outcome = run_receive_loop(&state, &mut connection).await;
    state.registry.remove(id).await;

    match outcome {
        Ok(Departure::Left) => info!(%id, %peer, "participant left"),
        Ok(Departure::Shutdown) => debug!(%id, %peer, "participant closed by shutdown"),
        Ok(departure) => {
            info!(%id, %peer, ?departure, "participant disconnected");
            state.notify(&format!("participant {id} disconnected"));
        }
        Err(err) => {
            warn!(%id, %peer, error = %err, "participant connection failed");
            state.notify(&format!("participant {id} disconnected"));
        }
    }
}

async fn run_receive_loop(state: &RelayState, connection: &mut Connection) -> Result<Departure> {
    let id = connection.id();
    let mut stopped = state.stop_signal();

    loop {
        let line = select! {
            _ = stopped.wait_for(|stopped| *stopped) => return Ok(Departure::Shutdown),
            line = next_line(connection, state.config.idle_timeout) => line?,
        };

        let Some(line) = line else {
            return Ok(Departure::Disconnected);
        };
        if !connection.is_live() {
            return Ok(Departure::Dropped);
        }

        let report = state.registry.broadcast(&line, Some(id)).await;
        debug!(%id, delivered = report.delivered, failed = report.failed.len(), "relayed line");

        let message = Message::parse(&line);
        match message.kind() {
            MessageKind::Leave => {
                state
                    .view
                    .display_message(message.as_line(), Alignment::Center, StyleHint::Leave);
                return Ok(Departure::Left);
            }
            MessageKind::Chat => {
                state
                    .view
                    .display_message(message.as_line(), Alignment::Left, StyleHint::Other);
            }
        }
    }
}

async fn next_line(connection: &mut Connection, idle_timeout: Option<Duration>) -> Result<Option<String>> {
    match idle_timeout {
        Some(limit) => timeout(limit, connection.read_line())
            .await
            .map_err(|_| ChatError::IdleTimeout(limit))?,
        None => connection.read_line().await,
    }
}

/// Lets the relay operator take part in the chat.
#[derive(Clone)]
pub struct RelayHandle {
    state: Arc<RelayState>,
}

impl RelayHandle {
    /// Broadcasts `body` to every participant as `<label>: <body>` and
    /// renders it locally. Empty input is ignored.
    pub async fn send_local(&self, body: &str) -> Result<BroadcastReport> {
        if body.is_empty() {
            return Ok(BroadcastReport::default());
        }
        let message = Message::chat(self.state.config.label.as_str(), body)?;
        let report = self.state.registry.broadcast(message.as_line(), None).await;
        self.state
            .view
            .display_message(body, Alignment::Right, StyleHint::Own);
        Ok(report)
    }

    /// Announces the operator's departure to everyone and stops the relay.
    pub async fn leave(&self) -> Result<BroadcastReport> {
        let message = Message::leave(self.state.config.label.as_str())?;
        let report = self.state.registry.broadcast(message.as_line(), None).await;
        self.state
            .view
            .display_message(message.as_line(), Alignment::Center, StyleHint::Leave);
        self.state.stop();
        Ok(report)
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.stopped.borrow()
    }

    pub async fn participants(&self) -> Vec<ConnectionId> {
        self.state.registry.snapshot_ids().await
    }
}
