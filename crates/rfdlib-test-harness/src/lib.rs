//! rfdlib-test-harness: Test utilities and mock transports for rfdlib.
//!
//! This crate provides [`MockTransport`], a scripted stand-in for a radio
//! modem that lets the AT command driver be tested deterministically
//! without hardware.

pub mod mock_serial;

pub use mock_serial::MockTransport;
