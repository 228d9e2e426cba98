use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use relay_chat::{
    protocol::{is_leave_notice, read_line, write_line},
    relay::{Relay, RelayConfig, RelayHandle},
    view::{ChannelView, DisplayEvent, StyleHint},
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc::UnboundedReceiver, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct TestRelay {
    addr: SocketAddr,
    handle: RelayHandle,
    events: UnboundedReceiver<DisplayEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let (view, events) = ChannelView::new();
        let relay = Relay::new(listener, config, Arc::new(view));
        let addr = relay.local_addr()?;
        let handle = relay.handle();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            handle,
            events,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    async fn join(&self) -> Result<Participant> {
        let before = self.handle.participants().await.len();
        let stream = TcpStream::connect(self.addr).await?;
        let (reader, writer) = stream.into_split();
        self.wait_for_participants(before + 1).await?;
        Ok(Participant {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn wait_for_participants(&self, count: usize) -> Result<()> {
        timeout(WAIT, async {
            while self.handle.participants().await.len() != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("waiting for {count} participants"))
    }

    /// Next display event that is not an operator notice.
    async fn next_chat_event(&mut self) -> Result<DisplayEvent> {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .context("waiting for display event")?
                .context("view channel closed")?;
            if event.style != StyleHint::Notice {
                return Ok(event);
            }
        }
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        timeout(WAIT, self.server).await??;
        Ok(())
    }
}

struct Participant {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Participant {
    async fn send(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.writer, line).await?;
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(timeout(WAIT, read_line(&mut self.reader)).await??)
    }

    async fn expect_line(&mut self, expected: &str) -> Result<()> {
        match self.recv().await? {
            Some(line) if line == expected => Ok(()),
            other => bail!("expected {expected:?}, got {other:?}"),
        }
    }

    async fn expect_silence(&mut self) -> Result<()> {
        match timeout(QUIET, read_line(&mut self.reader)).await {
            Err(_) => Ok(()),
            Ok(line) => bail!("expected no traffic, got {line:?}"),
        }
    }
}

#[tokio::test]
async fn line_from_one_participant_reaches_all_others() -> Result<()> {
    let mut relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;
    let mut c3 = relay.join().await?;

    c1.send("C1: hello").await?;
    c2.expect_line("C1: hello").await?;
    c3.expect_line("C1: hello").await?;
    c1.expect_silence().await?;

    let shown = relay.next_chat_event().await?;
    assert_eq!(shown.text, "C1: hello");
    assert_eq!(shown.style, StyleHint::Other);

    relay.stop().await
}

#[tokio::test]
async fn leave_notice_is_relayed_and_removes_the_sender() -> Result<()> {
    let mut relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;
    let mut c3 = relay.join().await?;

    c2.send("Client2 has left the chat room").await?;

    for receiver in [&mut c1, &mut c3] {
        let line = receiver.recv().await?.context("leave notice")?;
        assert_eq!(line, "Client2 has left the chat room");
        assert!(is_leave_notice(&line));
    }

    relay.wait_for_participants(2).await?;
    assert_eq!(c2.recv().await?, None, "relay closes the leaver's transport");

    let shown = relay.next_chat_event().await?;
    assert_eq!(shown.style, StyleHint::Leave);

    let report = relay.handle.send_local("still here").await?;
    assert_eq!(report.delivered, 2);
    c1.expect_line("Server: still here").await?;
    c3.expect_line("Server: still here").await?;

    relay.stop().await
}

#[tokio::test]
async fn abrupt_disconnect_is_silent_for_others() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;
    let c3 = relay.join().await?;

    drop(c3);
    relay.wait_for_participants(2).await?;

    c1.expect_silence().await?;
    c2.expect_silence().await?;

    c1.send("C1: anyone?").await?;
    c2.expect_line("C1: anyone?").await?;

    relay.stop().await
}

#[tokio::test]
async fn invalid_utf8_is_relayed_without_dropping_the_sender() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;

    c1.send_raw(b"alice: caf\xe9\n").await?;
    c2.expect_line("alice: caf\u{FFFD}").await?;
    assert_eq!(relay.handle.participants().await.len(), 2);

    c1.send("alice: still here").await?;
    c2.expect_line("alice: still here").await?;

    relay.stop().await
}

#[tokio::test]
async fn local_message_goes_to_every_participant() -> Result<()> {
    let mut relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;

    let report = relay.handle.send_local("welcome").await?;
    assert_eq!(report.delivered, 2);
    c1.expect_line("Server: welcome").await?;
    c2.expect_line("Server: welcome").await?;

    let shown = relay.next_chat_event().await?;
    assert_eq!(shown.text, "welcome");
    assert_eq!(shown.style, StyleHint::Own);

    relay.stop().await
}

#[tokio::test]
async fn broadcast_with_no_participants_is_a_no_op() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let report = relay.handle.send_local("echo?").await?;
    assert_eq!(report.delivered, 0);
    assert!(report.failed.is_empty());
    assert!(relay.handle.participants().await.is_empty());

    relay.stop().await
}

#[tokio::test]
async fn lines_from_one_sender_arrive_in_order() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;
    let mut sender = relay.join().await?;
    let mut receiver = relay.join().await?;

    for n in 0..25 {
        sender.send(&format!("C1: message {n}")).await?;
    }
    for n in 0..25 {
        receiver.expect_line(&format!("C1: message {n}")).await?;
    }

    relay.stop().await
}

#[tokio::test]
async fn silent_participant_is_dropped_after_idle_timeout() -> Result<()> {
    let config = RelayConfig {
        idle_timeout: Some(Duration::from_millis(150)),
        ..RelayConfig::default()
    };
    let relay = TestRelay::start(config).await?;
    let mut quiet = relay.join().await?;

    relay.wait_for_participants(0).await?;
    assert_eq!(quiet.recv().await?, None);

    relay.stop().await
}

#[tokio::test]
async fn operator_leave_notifies_everyone_and_stops_the_relay() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let mut c2 = relay.join().await?;

    relay.handle.leave().await?;

    for participant in [&mut c1, &mut c2] {
        participant
            .expect_line("Server has left the chat room")
            .await?;
        assert_eq!(participant.recv().await?, None);
    }
    assert!(relay.handle.is_stopped());

    timeout(WAIT, relay.server).await??;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_open_connections() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;
    let mut c1 = relay.join().await?;
    let handle = relay.handle.clone();

    relay.stop().await?;

    assert_eq!(c1.recv().await?, None);
    assert!(handle.participants().await.is_empty());
    Ok(())
}
