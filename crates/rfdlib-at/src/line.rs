//! Line protocol over a byte transport.
//!
//! [`LineTransport`] layers the three primitives the AT driver needs on top
//! of a raw [`Transport`]: verbatim writes, terminated line writes, and
//! [`expect`](LineTransport::expect), which waits for a literal or regular
//! expression within a timeout and hands back the text before the match
//! and the matched text.
//!
//! Received bytes live in a buffer that survives across calls. A match may
//! span several reads, and bytes after a match stay buffered for the next
//! `expect`. Every byte in either direction can also be copied to a
//! transcript writer.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use rfdlib_core::error::{Error, Result};
use rfdlib_core::transport::Transport;

/// Default line terminator (`\r\n`).
pub const DEFAULT_TERMINATOR: [u8; 2] = *b"\r\n";

/// Receive buffer bound. SiK responses are a few dozen bytes; only line
/// noise or a modem stuck in data mode gets near this.
const MAX_BUF: usize = 8192;

/// Bytes requested per `receive()` call.
const READ_CHUNK: usize = 256;

/// Attempts for a write that reports a timeout.
const WRITE_ATTEMPTS: u32 = 3;

/// What [`LineTransport::expect`] waits for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte sequence.
    Literal(Vec<u8>),
    /// Regular expression over raw bytes.
    Regex(Regex),
}

impl Pattern {
    /// A literal pattern.
    pub fn literal(text: impl AsRef<[u8]>) -> Self {
        Pattern::Literal(text.as_ref().to_vec())
    }

    /// A regular expression pattern.
    pub fn regex(re: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(re)?))
    }

    /// Byte range of the first match in `haystack`.
    fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(needle) if needle.is_empty() => Some((0, 0)),
            Pattern::Literal(needle) => haystack
                .windows(needle.len())
                .position(|w| w == needle.as_slice())
                .map(|start| (start, start + needle.len())),
            Pattern::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Text captured by a successful [`LineTransport::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Everything received before the match (since the previous match).
    pub before: String,
    /// The matched text itself.
    pub after: String,
}

/// Line-oriented request/response exchange over a borrowed [`Transport`].
///
/// The transport is borrowed exclusively for the lifetime of the
/// `LineTransport`; the protocol is strictly half-duplex, so nothing else
/// may touch the link while a stage holds it.
pub struct LineTransport<'a> {
    transport: &'a mut dyn Transport,
    transcript: Option<&'a mut (dyn Write + Send)>,
    terminator: [u8; 2],
    buffer: Vec<u8>,
}

impl<'a> LineTransport<'a> {
    /// Wrap a transport, using `\r\n` as the line terminator.
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        LineTransport {
            transport,
            transcript: None,
            terminator: DEFAULT_TERMINATOR,
            buffer: Vec::new(),
        }
    }

    /// Use a different two-byte line terminator.
    pub fn with_terminator(mut self, terminator: [u8; 2]) -> Self {
        self.terminator = terminator;
        self
    }

    /// Copy all sent and received bytes to `transcript`.
    pub fn with_transcript(mut self, transcript: &'a mut (dyn Write + Send)) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// The configured line terminator.
    pub fn terminator(&self) -> [u8; 2] {
        self.terminator
    }

    /// Write `data` verbatim, with no terminator.
    ///
    /// A write the transport reports as blocked ([`Error::Timeout`]) is
    /// retried with a short linear backoff; after the last attempt the
    /// failure is reported as [`Error::Transport`].
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                debug!(attempt, "write blocked, retrying");
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            match self.transport.send(data).await {
                Ok(()) => {
                    self.record(data);
                    return Ok(());
                }
                Err(Error::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(attempts = WRITE_ATTEMPTS, "write blocked, giving up");
        Err(Error::Transport(format!(
            "write blocked after {WRITE_ATTEMPTS} attempts"
        )))
    }

    /// Write `text` followed by the line terminator, as a single write.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        debug!(line = text, "sending");
        let mut line = Vec::with_capacity(text.len() + self.terminator.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(&self.terminator);
        self.send_raw(&line).await
    }

    /// Wait up to `timeout` for `pattern`.
    ///
    /// Returns [`Error::Timeout`] if the pattern has not appeared by the
    /// deadline; whatever arrived stays buffered and is available from
    /// [`pending_text`](Self::pending_text). Never waits past the deadline,
    /// even on a silent line.
    pub async fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> Result<Match> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((start, end)) = pattern.find(&self.buffer) {
                let before = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
                let after = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                self.buffer.drain(..end);
                trace!(%pattern, before = ?before, after = ?after, "matched");
                return Ok(Match { before, after });
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(%pattern, pending = %self.pending_text(), "expect timed out");
                return Err(Error::Timeout);
            }
            if let Err(e) = self.fill(deadline - now).await {
                if matches!(e, Error::Timeout) {
                    debug!(%pattern, pending = %self.pending_text(), "expect timed out");
                }
                return Err(e);
            }
        }
    }

    /// Read one line, returning it without the terminator.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let terminator = Pattern::literal(self.terminator);
        let m = self.expect(&terminator, timeout).await?;
        Ok(m.before)
    }

    /// Read for the whole of `window`, then discard everything buffered.
    ///
    /// Returns the discarded text so callers can log it. Also serves as a
    /// timed pause that keeps the receive side flowing.
    pub async fn drain(&mut self, window: Duration) -> Result<String> {
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.fill(deadline - now).await {
                Ok(()) => {}
                Err(Error::Timeout) => {
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.take_pending())
    }

    /// Buffered text not yet consumed by a match.
    pub fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Remove and return everything buffered.
    pub fn take_pending(&mut self) -> String {
        let text = self.pending_text();
        self.buffer.clear();
        text
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.flush_transcript();
        self.transport.close().await
    }

    /// One read of at most `timeout` into the buffer.
    async fn fill(&mut self, timeout: Duration) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.transport.receive(&mut chunk, timeout).await?;
        if n == 0 {
            return Ok(());
        }
        self.record(&chunk[..n]);
        self.buffer.extend_from_slice(&chunk[..n]);

        if self.buffer.len() > MAX_BUF {
            let excess = self.buffer.len() - MAX_BUF / 2;
            warn!(
                len = self.buffer.len(),
                dropped = excess,
                "receive buffer overflow, dropping oldest bytes"
            );
            self.buffer.drain(..excess);
        }
        Ok(())
    }

    fn record(&mut self, data: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.write_all(data) {
                warn!(error = %e, "transcript write failed, disabling transcript");
                self.transcript = None;
            }
        }
    }

    fn flush_transcript(&mut self) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.flush() {
                warn!(error = %e, "transcript flush failed");
            }
        }
    }
}
