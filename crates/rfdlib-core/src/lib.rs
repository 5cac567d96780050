//! rfdlib-core: Core traits and error definitions for rfdlib.
//!
//! This crate defines the link-level abstractions shared by every rfdlib
//! crate. The AT command driver in `rfdlib-at` talks to a modem only through
//! these types, so it can run against a real serial port or a scripted mock.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::Transport;
