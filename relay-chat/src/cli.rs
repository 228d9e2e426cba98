use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    relay::{DEFAULT_LABEL, RelayConfig},
    session::{DEFAULT_NAME, SessionConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting participants over TCP and chatting as the operator.
    Relay(RelayArgs),
    /// Connect to a relay and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:9999")]
    pub listen: SocketAddr,

    /// Label attached to messages typed at the relay console.
    #[arg(long, default_value = DEFAULT_LABEL, value_parser = parse_label)]
    pub label: String,

    /// Drop participants that stay silent for this many seconds.
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

impl RelayArgs {
    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            label: self.label.clone(),
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name shown in front of every message this participant sends.
    #[arg(long, default_value = DEFAULT_NAME, value_parser = parse_label)]
    pub name: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "localhost:9999")]
    pub server: String,
}

impl ClientArgs {
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            server: self.server.clone(),
            name: self.name.clone(),
        }
    }
}

fn parse_label(raw: &str) -> Result<String, String> {
    let label = raw.trim();
    if label.is_empty() {
        return Err("label cannot be empty".to_string());
    }
    if label.contains(['\n', '\r']) {
        return Err("label cannot contain line breaks".to_string());
    }
    Ok(label.to_string())
}
