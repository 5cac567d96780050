//! Transport implementations for rfdlib.
//!
//! This crate provides [`SerialTransport`], the concrete implementation of
//! the [`Transport`](rfdlib_core::Transport) trait for USB-serial adapters
//! and RS-232 links to RFD900-family modems.
//!
//! # Example
//!
//! ```no_run
//! use rfdlib_transport::SerialTransport;
//! use rfdlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> rfdlib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 57600).await?;
//!
//! transport.send(b"+++").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
