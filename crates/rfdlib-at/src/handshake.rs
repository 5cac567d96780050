//! Command-mode handshake.
//!
//! At session start the modem may be passing radio data, sitting in command
//! mode left over from an aborted run, or still booting. The handshake gets
//! it into command mode from any of these with a bounded state machine:
//!
//! ```text
//! Idle --(guard, +++, guard)--> EscapeSent --OK--> CommandMode
//!                                   |
//!                                timeout
//!                                   v
//!          Idle <--(ATZ, settle)-- ResetPending      (at most once)
//!                                   |
//!                     timeout after the reset: Failed
//! ```
//!
//! SiK only treats `+++` as an escape when the line is silent for the
//! guard interval on both sides of it. The silence before the escape is
//! spent draining stale input, so a leftover `OK` can never be mistaken for
//! the acknowledgement.

use std::time::Duration;

use tracing::{debug, info, warn};

use rfdlib_core::error::{Error, Result};

use crate::line::{LineTransport, Pattern};

/// Escape sequence that switches SiK firmware into command mode.
pub const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Soft reset command.
pub const RESET_COMMAND: &str = "ATZ";

/// Acknowledgement text.
pub const ACK: &str = "OK";

/// States of the command-mode handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    EscapeSent,
    ResetPending,
    CommandMode,
    Failed,
}

/// Handshake timing.
#[derive(Debug, Clone)]
pub struct HandshakeTiming {
    /// Silence required before and after `+++`.
    pub guard_interval: Duration,
    /// How long to wait for `OK` after the escape.
    pub ack_timeout: Duration,
    /// Pause after `ATZ` while the modem reboots.
    pub reset_settle: Duration,
}

impl Default for HandshakeTiming {
    fn default() -> Self {
        HandshakeTiming {
            guard_interval: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(1),
            reset_settle: Duration::from_secs(3),
        }
    }
}

/// How the handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Terminal state: [`HandshakeState::CommandMode`] or [`HandshakeState::Failed`].
    pub state: HandshakeState,
    /// Escape attempts made (1 or 2).
    pub attempts: u32,
    /// Resets issued (0 or 1).
    pub resets: u32,
}

impl HandshakeReport {
    pub fn in_command_mode(&self) -> bool {
        self.state == HandshakeState::CommandMode
    }
}

/// Drive the modem into command mode.
///
/// Returns `Ok` with a [`HandshakeReport`] whether or not command mode was
/// reached; `Err` only for link failures.
pub async fn enter_command_mode(
    line: &mut LineTransport<'_>,
    timing: &HandshakeTiming,
) -> Result<HandshakeReport> {
    let ack = Pattern::literal(ACK);
    let mut state = HandshakeState::Idle;
    let mut reset_allowed = true;
    let mut attempts = 0;
    let mut resets = 0;

    loop {
        debug!(?state, attempts, resets, "handshake");
        state = match state {
            HandshakeState::Idle => {
                attempts += 1;
                let stale = line.drain(timing.guard_interval).await?;
                if !stale.is_empty() {
                    debug!(discarded = ?stale, "discarded input before escape");
                }
                line.send_raw(ESCAPE_SEQUENCE).await?;
                tokio::time::sleep(timing.guard_interval).await;
                HandshakeState::EscapeSent
            }
            HandshakeState::EscapeSent => match line.expect(&ack, timing.ack_timeout).await {
                Ok(_) => HandshakeState::CommandMode,
                Err(Error::Timeout) if reset_allowed => {
                    warn!("no acknowledgement to escape, resetting modem");
                    HandshakeState::ResetPending
                }
                Err(Error::Timeout) => HandshakeState::Failed,
                Err(e) => return Err(e),
            },
            HandshakeState::ResetPending => {
                reset_allowed = false;
                resets += 1;
                line.send_line(RESET_COMMAND).await?;
                tokio::time::sleep(timing.reset_settle).await;
                HandshakeState::Idle
            }
            HandshakeState::CommandMode | HandshakeState::Failed => break,
        };
    }

    if state == HandshakeState::CommandMode {
        info!(attempts, resets, "in command mode");
    } else {
        warn!(attempts, resets, "unable to enter command mode");
    }
    Ok(HandshakeReport {
        state,
        attempts,
        resets,
    })
}
