//! Terminal front ends for the relay operator and for participants.
//!
//! Both read commands from stdin and render through [`TerminalView`]. Lines
//! are sent as chat messages; `/leave` (or `/quit`) leaves the chat room.

use std::{io::BufRead, sync::Arc, thread};

use anyhow::{Context, Result};
use tokio::{select, sync::mpsc};
use tracing::{info, warn};

use crate::{
    cli::{ClientArgs, RelayArgs},
    protocol::decode_line,
    relay::{Relay, RelayHandle},
    session::PeerSession,
    view::{Alignment, ChatView, StyleHint, TerminalView},
};

const LEAVE_COMMANDS: &[&str] = &["/leave", "/quit"];

pub fn is_leave_command(input: &str) -> bool {
    let input = input.trim();
    LEAVE_COMMANDS
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}

pub async fn run_relay(args: RelayArgs) -> Result<()> {
    let view: Arc<dyn ChatView> = Arc::new(TerminalView::new());
    let relay = match Relay::bind(args.listen, args.config(), Arc::clone(&view)).await {
        Ok(relay) => relay,
        Err(err) => {
            view.display_error(&err);
            return Err(err.into());
        }
    };

    let addr = relay.local_addr().context("relay has no local address")?;
    info!(%addr, "relay listening");
    view.display_message(
        &format!("relay listening on {addr}"),
        Alignment::Left,
        StyleHint::Notice,
    );

    let handle = relay.handle();
    let console = tokio::spawn(run_operator_console(handle.clone(), Arc::clone(&view)));

    relay
        .run_until(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
            if let Err(err) = handle.leave().await {
                warn!(error = %err, "failed to announce relay departure");
            }
        })
        .await?;

    console.abort();
    Ok(())
}

async fn run_operator_console(handle: RelayHandle, view: Arc<dyn ChatView>) {
    let mut input = spawn_input_reader();

    while let Some(line) = input.recv().await {
        if is_leave_command(&line) {
            if let Err(err) = handle.leave().await {
                view.display_error(&err);
            }
            return;
        }
        if let Err(err) = handle.send_local(&line).await {
            view.display_error(&err);
        }
    }

    // The relay keeps serving participants without an operator.
    info!("operator console closed");
}

pub async fn run_client(args: ClientArgs) -> Result<()> {
    let view: Arc<dyn ChatView> = Arc::new(TerminalView::new());
    let config = args.config();
    let mut session = match PeerSession::connect(&config, Arc::clone(&view)).await {
        Ok(session) => session,
        Err(err) => {
            view.display_error(&err);
            return Err(err.into());
        }
    };
    view.display_message(
        &format!("connected to {} as {}", config.server, config.name),
        Alignment::Left,
        StyleHint::Notice,
    );

    let result = run_client_loop(&mut session, view.as_ref(), spawn_input_reader()).await;
    if let Err(err) = &result {
        view.display_error(err);
        session.close().await;
    }
    result.map_err(Into::into)
}

/// Drives a participant until it leaves or the relay goes away. Only
/// transport failures end the loop with an error; a line that cannot be sent
/// as typed is reported and skipped.
async fn run_client_loop(
    session: &mut PeerSession,
    view: &dyn ChatView,
    mut input: mpsc::UnboundedReceiver<String>,
) -> crate::error::Result<()> {
    loop {
        select! {
            closed = session.closed() => return closed,
            line = input.recv() => match line {
                Some(line) if is_leave_command(&line) => return session.leave().await,
                Some(line) => match session.send(&line).await {
                    Err(err) if err.is_protocol() => view.display_error(&err),
                    result => result?,
                },
                None => return session.leave().await,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(err) = ctrl_c {
                    warn!(error = ?err, "ctrl-c handler failed");
                }
                return session.leave().await;
            }
        }
    }
}

/// Reads stdin on a dedicated thread so a pending read never keeps the
/// runtime from shutting down.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || forward_lines(std::io::stdin().lock(), &tx));
    rx
}

fn forward_lines<R: BufRead>(reader: R, tx: &mpsc::UnboundedSender<String>) {
    for bytes in reader.split(b'\n') {
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = ?err, "failed to read input");
                break;
            }
        };
        if std::str::from_utf8(&bytes).is_err() {
            warn!("input line is not valid UTF-8, replacing invalid bytes");
        }
        if tx.send(decode_line(&bytes)).is_err() {
            break;
        }
    }
}
