//! Newline-delimited text protocol shared by the relay and its participants.
//!
//! Every message travels as exactly one line of UTF-8 text; invalid bytes are
//! replaced on receipt rather than rejected. Ordinary chat lines look
//! like `<origin>: <body>`; a participant announces its departure with the
//! sentence `<origin> has left the chat room`. There is no escaping, so text
//! containing a raw line break cannot be sent.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChatError, Result};

/// Phrase that marks a line as a leave notice wherever it appears.
pub const LEAVE_PHRASE: &str = "has left the chat room";

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const ORIGIN_SEPARATOR: &str = ": ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Leave,
}

/// Classifies a raw line. Any line containing [`LEAVE_PHRASE`] is a leave
/// notice, regardless of what surrounds it.
pub fn classify(line: &str) -> MessageKind {
    if line.contains(LEAVE_PHRASE) {
        MessageKind::Leave
    } else {
        MessageKind::Chat
    }
}

pub fn is_leave_notice(line: &str) -> bool {
    classify(line) == MessageKind::Leave
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: Option<String>,
    body: String,
    kind: MessageKind,
    line: String,
}

impl Message {
    pub fn chat(origin: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let body = body.into();
        ensure_single_line(&origin)?;
        ensure_single_line(&body)?;
        let line = format!("{origin}{ORIGIN_SEPARATOR}{body}");
        let kind = classify(&line);
        Ok(Self {
            body: match kind {
                MessageKind::Leave => line.clone(),
                MessageKind::Chat => body,
            },
            origin: Some(origin),
            kind,
            line,
        })
    }

    pub fn leave(origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        ensure_single_line(&origin)?;
        let line = format!("{origin} {LEAVE_PHRASE}");
        Ok(Self {
            origin: Some(origin),
            body: line.clone(),
            kind: MessageKind::Leave,
            line,
        })
    }

    /// Interprets a received line. Never fails: lines are opaque text and the
    /// only distinguished shape is the leave phrase. A leave notice keeps the
    /// whole line as its body.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(LINE_ENDINGS);
        let kind = classify(line);
        let (origin, body) = match (line.split_once(ORIGIN_SEPARATOR), kind) {
            (Some((origin, _)), MessageKind::Leave) => (Some(origin.to_string()), line.to_string()),
            (Some((origin, body)), MessageKind::Chat) => (Some(origin.to_string()), body.to_string()),
            (None, MessageKind::Leave) => {
                let origin = line
                    .split_once(LEAVE_PHRASE)
                    .map(|(origin, _)| origin.trim_end())
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string);
                (origin, line.to_string())
            }
            (None, MessageKind::Chat) => (None, line.to_string()),
        };
        Self {
            origin,
            body,
            kind,
            line: line.to_string(),
        }
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_leave(&self) -> bool {
        self.kind == MessageKind::Leave
    }

    /// Wire form without the trailing newline.
    pub fn as_line(&self) -> &str {
        &self.line
    }
}

pub fn ensure_single_line(text: &str) -> Result<()> {
    if text.contains(LINE_ENDINGS) {
        return Err(ChatError::EmbeddedNewline);
    }
    Ok(())
}

/// Reads one line, without its terminator. `Ok(None)` means the peer closed
/// the stream. Blank lines are returned as empty strings.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut bytes = Vec::new();
    if reader.read_until(b'\n', &mut bytes).await? == 0 {
        return Ok(None);
    }
    Ok(Some(decode_line(&bytes)))
}

/// Turns raw line bytes into text, stripping the terminator. Invalid UTF-8
/// becomes U+FFFD.
pub fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(LINE_ENDINGS)
        .to_string()
}

/// Writes `line` plus the newline terminator and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    ensure_single_line(line)?;
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
