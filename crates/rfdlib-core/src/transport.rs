//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a radio
//! modem. Implementations exist for serial ports (`rfdlib-transport`) and a
//! scripted mock for testing (`rfdlib-test-harness`).
//!
//! The command-mode driver in `rfdlib-at` operates on a `Transport` rather
//! than directly on a serial port, which keeps handshake timing, response
//! matching and configuration logic testable without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Line framing, pattern matching and the AT command set are handled
/// by the line protocol in `rfdlib-at`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying device. A write that cannot complete in bounded time
    /// reports [`Error::Timeout`](crate::Error::Timeout).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::Error::Timeout) if no data is
    /// received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
