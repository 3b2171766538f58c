//! Outbound line vocabulary for the host.
//!
//! Every line is written whole and flushed right away; the host renders the
//! stream incrementally and blocks until it sees the terminal marker.

use std::fmt;
use std::io::Write;

pub const TOKEN_PREFIX: &str = "TOKEN:";
pub const SUMMARY_PREFIX: &str = "SUMMARY_RESULT:";
pub const THINKING_MARKER: &str = "[Thinking]";
pub const DONE_MARKER: &str = "[DONE]";
pub const NEWLINE_MARKER: &str = "[NEWLINE]";
pub const READY_LINE: &str = "READY";

/// Rewrite `\r\n`, `\n` and `\r` to the literal newline marker.
pub fn escape_newlines(text: &str) -> String {
    text.replace("\r\n", NEWLINE_MARKER)
        .replace('\n', NEWLINE_MARKER)
        .replace('\r', NEWLINE_MARKER)
}

/// Inverse of [`escape_newlines`] as the host applies it.
pub fn unescape_newlines(text: &str) -> String {
    text.replace(NEWLINE_MARKER, "\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One fragment of assistant output, escaped on render.
    Token(String),
    Thinking,
    Done,
    Summary(String),
    Ready,
    ConfigError(String),
    CriticalError(String),
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Token(text) => write!(f, "{}{}", TOKEN_PREFIX, escape_newlines(text)),
            Outbound::Thinking => write!(f, "{}{}", TOKEN_PREFIX, THINKING_MARKER),
            Outbound::Done => write!(f, "{}{}", TOKEN_PREFIX, DONE_MARKER),
            Outbound::Summary(text) => write!(f, "{}{}", SUMMARY_PREFIX, escape_newlines(text)),
            Outbound::Ready => f.write_str(READY_LINE),
            Outbound::ConfigError(detail) => write!(
                f,
                "{}Error loading config: {}",
                TOKEN_PREFIX,
                escape_newlines(detail)
            ),
            Outbound::CriticalError(detail) => write!(
                f,
                "{}Critical error: {}",
                TOKEN_PREFIX,
                escape_newlines(detail)
            ),
        }
    }
}

/// Line writer that flushes after every emitted line.
pub struct LineWriter<W: Write> {
    inner: W,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one line in a single call and flush it.
    pub fn emit(&mut self, line: &Outbound) -> std::io::Result<()> {
        let mut text = line.to_string();
        text.push('\n');
        self.inner.write_all(text.as_bytes())?;
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
