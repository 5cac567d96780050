//! Error types for the AT command driver.
//!
//! [`SessionError`] is what the session stages return; the orchestrator
//! turns the first one into the device's
//! [`SessionOutcome`](crate::session::SessionOutcome). [`TableError`] covers
//! building command tables from deployment data.

use std::time::Duration;

use crate::commands::RadioVariant;

/// A failure that ends the session for one device.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The modem never acknowledged the escape sequence, even after the
    /// single reset-and-retry cycle.
    #[error("unable to enter command mode after {resets} reset(s)")]
    HandshakeFailed { resets: u32 },

    /// An identification query went unanswered.
    #[error("no answer to identification query {query}")]
    IdentityTimeout { query: &'static str },

    /// The identification banner names firmware this tool does not know.
    #[error("unknown firmware variant: {banner:?}")]
    UnknownVariant { banner: String },

    /// The configuration names a key the variant's command table lacks.
    #[error("no {variant} command for configuration key {key:?}")]
    UnresolvedKey { key: String, variant: RadioVariant },

    /// A configuration value failed the command's validator.
    #[error("invalid value {value:?} for {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A configuration command was not acknowledged with `OK`.
    #[error("{command} ({key}) rejected, modem answered {response:?}")]
    CommandRejected {
        key: String,
        command: String,
        response: String,
    },

    /// Writing settings to non-volatile storage was not acknowledged.
    #[error("persisting settings failed, modem answered {response:?}")]
    PersistFailed { response: String },

    /// The overall session deadline expired.
    #[error("session deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    /// The link to the modem failed.
    #[error(transparent)]
    Transport(#[from] rfdlib_core::Error),
}

/// An invalid command table entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("template {template:?} for {key:?} must contain exactly one {{}} slot")]
    BadSlot { key: String, template: String },

    #[error("template {template:?} for {key:?} is not an AT command")]
    NotAtCommand { key: String, template: String },

    #[error("duplicate key {key:?} in {variant} command table")]
    DuplicateKey { key: String, variant: RadioVariant },
}
