//! Mock transport for deterministic testing of the AT command driver.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. A test scripts what the modem answers to each
//! write, including silence and replies that arrive split across several
//! reads.
//!
//! # Example
//!
//! ```
//! use rfdlib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // The modem acknowledges the escape sequence...
//! mock.expect(b"+++", b"OK\r\n");
//! // ...and echoes the identification query before answering it.
//! mock.expect_chunks(b"ATI\r\n", &[b"ATI\r\nRFD SiK 2.75MP on RFD9", b"00xR1.1\r\n"]);
//! // Silence: the write is accepted but nothing comes back.
//! mock.expect_silence(b"ATZ\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use rfdlib_core::error::{Error, Result};
use rfdlib_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Response chunks, each returned by a separate `receive()` call.
    chunks: Vec<Vec<u8>>,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; its response
/// chunks are queued behind anything the test has not read yet, the way a
/// real UART keeps unread bytes.
///
/// `receive()` returns one queued chunk per call and
/// [`Error::Timeout`] once the queue is empty.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Response chunks waiting to be read.
    pending: VecDeque<Vec<u8>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Number of upcoming `send()` calls that report a blocked write.
    blocked_writes: usize,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            connected: true,
            blocked_writes: 0,
            sent_log: Vec::new(),
        }
    }

    /// Add an expected request and the response delivered in one read.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        let chunks = if response.is_empty() {
            Vec::new()
        } else {
            vec![response.to_vec()]
        };
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks,
        });
    }

    /// Add an expected request whose response arrives as separate reads.
    pub fn expect_chunks(&mut self, request: &[u8], chunks: &[&[u8]]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        });
    }

    /// Add an expected request that the modem never answers.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.expect(request, b"");
    }

    /// Queue bytes that arrive without any request (line noise, boot banner).
    pub fn push_unsolicited(&mut self, data: &[u8]) {
        self.pending.push_back(data.to_vec());
    }

    /// Make the next `n` writes fail with [`Error::Timeout`] before they
    /// are matched against expectations.
    pub fn block_writes(&mut self, n: usize) {
        self.blocked_writes = n;
    }

    /// Return a reference to all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Sent data rendered as text, one entry per `send()` call.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent_log
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.blocked_writes > 0 {
            self.blocked_writes -= 1;
            return Err(Error::Timeout);
        }

        self.sent_log.push(data.to_vec());

        match self.expectations.pop_front() {
            Some(expectation) if data == expectation.request.as_slice() => {
                self.pending.extend(expectation.chunks);
                Ok(())
            }
            Some(expectation) => Err(Error::Transport(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            ))),
            None => Err(Error::Transport(format!(
                "no more expectations in mock transport (got {:?})",
                String::from_utf8_lossy(data)
            ))),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let Some(mut chunk) = self.pending.pop_front() else {
            return Err(Error::Timeout);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            // Buffer smaller than the chunk: keep the tail for the next read.
            self.pending.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"+++", b"OK\r\n");

        mock.send(b"+++").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATI\r\n", b"");
        mock.expect(b"ATI8\r\n", b"");

        mock.send(b"ATI\r\n").await.unwrap();
        mock.send(b"ATI8\r\n").await.unwrap();

        assert_eq!(mock.sent_data().len(), 2);
        assert_eq!(mock.sent_text(), vec!["ATI\r\n", "ATI8\r\n"]);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATI\r\n", b"");

        let result = mock.send(b"ATZ\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_silence_times_out() {
        let mut mock = MockTransport::new();
        mock.expect_silence(b"+++");
        mock.send(b"+++").await.unwrap();

        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_chunks_arrive_separately() {
        let mut mock = MockTransport::new();
        mock.expect_chunks(b"ATI\r\n", &[b"RFD", b"900\r\n"]);
        mock.send(b"ATI\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"RFD");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"900\r\n");
        assert!(mock.receive(&mut buf, Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn mock_transport_unread_bytes_are_kept() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT&T\r\n", b"OK\r\n");
        mock.expect(b"AT&W\r\n", b"ERROR\r\n");

        mock.send(b"AT&T\r\n").await.unwrap();
        mock.send(b"AT&W\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"ERROR\r\n");
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATI8\r\n", b"0xABCD");
        mock.send(b"ATI8\r\n").await.unwrap();

        let mut buf = [0u8; 4];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"0xAB");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
    }

    #[tokio::test]
    async fn mock_transport_blocked_writes() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");
        mock.block_writes(1);

        assert!(matches!(mock.send(b"AT\r\n").await, Err(Error::Timeout)));
        mock.send(b"AT\r\n").await.unwrap();
        assert_eq!(mock.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATI\r\n", b"");
        mock.expect(b"ATI8\r\n", b"");
        assert_eq!(mock.remaining_expectations(), 2);

        mock.send(b"ATI\r\n").await.unwrap();
        assert_eq!(mock.remaining_expectations(), 1);
    }
}
