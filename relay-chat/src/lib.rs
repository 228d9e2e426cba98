//! Line-oriented TCP chat with a central relay.
//!
//! A relay accepts participants and rebroadcasts each line it receives to
//! everyone else, while its operator chats as one more participant. Each
//! module covers one concern:
//!
//! - [`protocol`] defines the newline framing, the `<origin>: <body>` message
//!   shape and leave-notice detection.
//! - [`connection`] wraps one bidirectional line stream and its liveness.
//! - [`registry`] keeps the set of live connections and broadcasts to them.
//! - [`relay`] accepts connections and runs one receive loop per participant.
//! - [`session`] is the participant side: one connection to the relay.
//! - [`view`] is the boundary to whatever renders the chat.
//! - [`cli`] and [`console`] provide the command-line front ends.
//!
//! Unit tests sit next to each module; `tests/` drives real relays over
//! loopback TCP and the compiled binary end to end.

pub mod cli;
pub mod connection;
pub mod console;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod view;

pub use error::{ChatError, Result};
