//! Presentation boundary.
//!
//! The chat core never formats output itself; it hands text to a [`ChatView`]
//! together with where it should sit and how it should look. A graphical
//! front end would map these hints onto bubbles and colours. The binary uses
//! [`TerminalView`], and [`ChannelView`] forwards everything over a channel
//! for front ends living on another task.

use std::io::{self, Write};

use tokio::sync::mpsc;

use crate::error::ChatError;

const TERMINAL_WIDTH: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleHint {
    /// Sent by the local participant.
    Own,
    /// Received from someone else.
    Other,
    /// Someone left the chat room.
    Leave,
    /// Status line produced locally, e.g. the listening address.
    Notice,
    Error,
}

pub trait ChatView: Send + Sync {
    fn display_message(&self, text: &str, alignment: Alignment, style: StyleHint);

    fn display_error(&self, error: &ChatError) {
        self.display_message(&error.to_string(), Alignment::Center, StyleHint::Error);
    }
}

/// Plain stdout renderer. Own messages are right-aligned, received ones
/// left-aligned, leave notices centred between markers. Errors go to stderr.
#[derive(Debug, Clone)]
pub struct TerminalView {
    width: usize,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            width: TERMINAL_WIDTH,
        }
    }

    pub fn with_width(width: usize) -> Self {
        Self { width }
    }

    pub fn render(&self, text: &str, alignment: Alignment, style: StyleHint) -> String {
        let width = self.width;
        let text = match style {
            StyleHint::Leave => format!("*** {text} ***"),
            StyleHint::Notice => format!("*** {text}"),
            StyleHint::Error => format!("!!! {text}"),
            StyleHint::Own | StyleHint::Other => text.to_string(),
        };
        match alignment {
            Alignment::Left => text,
            Alignment::Right => format!("{text:>width$}"),
            Alignment::Center => format!("{text:^width$}").trim_end().to_string(),
        }
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView for TerminalView {
    fn display_message(&self, text: &str, alignment: Alignment, style: StyleHint) {
        let rendered = self.render(text, alignment, style);
        // A closed stdout leaves nowhere to report the failure.
        let _ = match style {
            StyleHint::Error => writeln!(io::stderr().lock(), "{rendered}"),
            _ => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{rendered}").and_then(|()| stdout.flush())
            }
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEvent {
    pub text: String,
    pub alignment: Alignment,
    pub style: StyleHint,
}

/// Forwards every display request as a [`DisplayEvent`].
#[derive(Debug, Clone)]
pub struct ChannelView {
    events: mpsc::UnboundedSender<DisplayEvent>,
}

impl ChannelView {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl ChatView for ChannelView {
    fn display_message(&self, text: &str, alignment: Alignment, style: StyleHint) {
        // The receiving UI may already be gone during shutdown.
        let _ = self.events.send(DisplayEvent {
            text: text.to_string(),
            alignment,
            style,
        });
    }
}
