//! Session orchestration -- one modem, one outcome.
//!
//! A [`Session`] runs the stages in strict order against a single
//! exclusively borrowed transport:
//!
//! 1. command-mode handshake ([`handshake`](crate::handshake))
//! 2. identification ([`identity`](crate::identity))
//! 3. apply, persist, status listing and reboot ([`applier`](crate::applier))
//!
//! The first failing stage ends the session. Whatever happens, the result
//! is a single [`SessionReport`] whose [`SessionOutcome`] names what went
//! wrong, and the transport is closed before `run` returns.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use rfdlib_core::transport::Transport;

use crate::applier::{Applier, ApplierTiming};
use crate::commands::{CommandTables, RadioVariant};
use crate::configuration::{ConfigurationSet, DeviceId};
use crate::error::SessionError;
use crate::handshake::{enter_command_mode, HandshakeTiming};
use crate::identity::resolve_identity;
use crate::line::{LineTransport, DEFAULT_TERMINATOR};

/// Every timing and protocol knob of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Line terminator for commands (default `\r\n`).
    pub terminator: [u8; 2],
    /// Silence before and after `+++` (default 1 s).
    pub guard_interval: Duration,
    /// Wait for the escape acknowledgement (default 1 s).
    pub escape_timeout: Duration,
    /// Pause after the handshake's reset (default 3 s).
    pub reset_settle: Duration,
    /// Wait for each identification answer (default 2 s).
    pub identity_timeout: Duration,
    /// Wait for the rest of the banner line (default 200 ms).
    pub identity_line_timeout: Duration,
    /// Wait for each configuration acknowledgement (default 2 s).
    pub command_timeout: Duration,
    /// Wait for the `AT&W` acknowledgement (default 2 s).
    pub persist_timeout: Duration,
    /// Discard window after `AT&T` (default 200 ms).
    pub debug_drain: Duration,
    /// Register listing lines to log; 0 disables the listing (default 25).
    pub status_lines: usize,
    /// Wait for each listing line (default 200 ms).
    pub status_line_timeout: Duration,
    /// Pause after the final reboot (default 1 s).
    pub reboot_settle: Duration,
    /// Upper bound on the whole session (default none).
    pub deadline: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let handshake = HandshakeTiming::default();
        let applier = ApplierTiming::default();
        SessionConfig {
            terminator: DEFAULT_TERMINATOR,
            guard_interval: handshake.guard_interval,
            escape_timeout: handshake.ack_timeout,
            reset_settle: handshake.reset_settle,
            identity_timeout: Duration::from_secs(2),
            identity_line_timeout: Duration::from_millis(200),
            command_timeout: applier.command_timeout,
            persist_timeout: applier.persist_timeout,
            debug_drain: applier.debug_drain,
            status_lines: applier.status_lines,
            status_line_timeout: applier.status_line_timeout,
            reboot_settle: applier.reboot_settle,
            deadline: None,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timing(&self) -> HandshakeTiming {
        HandshakeTiming {
            guard_interval: self.guard_interval,
            ack_timeout: self.escape_timeout,
            reset_settle: self.reset_settle,
        }
    }

    pub fn applier_timing(&self) -> ApplierTiming {
        ApplierTiming {
            command_timeout: self.command_timeout,
            persist_timeout: self.persist_timeout,
            debug_drain: self.debug_drain,
            status_lines: self.status_lines,
            status_line_timeout: self.status_line_timeout,
            reboot_settle: self.reboot_settle,
        }
    }
}

/// Final result of one device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All settings applied and persisted; carries the number applied.
    Applied(usize),
    HandshakeFailed,
    IdentityTimeout,
    UnknownVariant,
    UnresolvedKey(String),
    CommandRejected { key: String, response: String },
    InvalidValue { key: String, value: String },
    PersistFailed(String),
    TransportError(String),
    DeadlineExceeded,
}

impl SessionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SessionOutcome::Applied(_))
    }
}

impl From<SessionError> for SessionOutcome {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::HandshakeFailed { .. } => SessionOutcome::HandshakeFailed,
            SessionError::IdentityTimeout { .. } => SessionOutcome::IdentityTimeout,
            SessionError::UnknownVariant { .. } => SessionOutcome::UnknownVariant,
            SessionError::UnresolvedKey { key, .. } => SessionOutcome::UnresolvedKey(key),
            SessionError::InvalidValue { key, value, .. } => {
                SessionOutcome::InvalidValue { key, value }
            }
            SessionError::CommandRejected { key, response, .. } => {
                SessionOutcome::CommandRejected { key, response }
            }
            SessionError::PersistFailed { response } => SessionOutcome::PersistFailed(response),
            SessionError::DeadlineExceeded { .. } => SessionOutcome::DeadlineExceeded,
            SessionError::Transport(e) => SessionOutcome::TransportError(e.to_string()),
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Applied(n) => write!(f, "applied {n} setting(s)"),
            SessionOutcome::HandshakeFailed => f.write_str("unable to enter command mode"),
            SessionOutcome::IdentityTimeout => f.write_str("no answer to identification"),
            SessionOutcome::UnknownVariant => f.write_str("unknown firmware variant"),
            SessionOutcome::UnresolvedKey(key) => write!(f, "no command for key {key:?}"),
            SessionOutcome::CommandRejected { key, response } => {
                write!(f, "{key} rejected, modem answered {response:?}")
            }
            SessionOutcome::InvalidValue { key, value } => {
                write!(f, "invalid value {value:?} for {key}")
            }
            SessionOutcome::PersistFailed(response) => {
                write!(f, "persist failed, modem answered {response:?}")
            }
            SessionOutcome::TransportError(e) => write!(f, "transport error: {e}"),
            SessionOutcome::DeadlineExceeded => f.write_str("session deadline exceeded"),
        }
    }
}

/// Per-device record of a session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Caller-supplied label, normally the port name.
    pub label: String,
    pub outcome: SessionOutcome,
    /// Detected firmware variant, if identification got that far.
    pub variant: Option<RadioVariant>,
    /// Device ID, if identification completed.
    pub device_id: Option<DeviceId>,
    /// Configuration command lines sent, in order.
    pub commands: Vec<String>,
    pub elapsed: Duration,
}

/// What the stages learned, kept outside the deadline so a timed-out
/// session still reports it.
#[derive(Debug, Default)]
struct Progress {
    variant: Option<RadioVariant>,
    device_id: Option<DeviceId>,
    commands: Vec<String>,
}

/// Fluent builder for [`Session`].
///
/// ```ignore
/// let session = Session::builder(&tables, &configuration)
///     .command_timeout(Duration::from_secs(3))
///     .deadline(Duration::from_secs(60))
///     .build();
/// ```
pub struct SessionBuilder<'a> {
    tables: &'a CommandTables,
    configuration: &'a ConfigurationSet,
    config: SessionConfig,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(tables: &'a CommandTables, configuration: &'a ConfigurationSet) -> Self {
        SessionBuilder {
            tables,
            configuration,
            config: SessionConfig::default(),
        }
    }

    /// Replace every setting at once.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the line terminator (default `\r\n`).
    pub fn terminator(mut self, terminator: [u8; 2]) -> Self {
        self.config.terminator = terminator;
        self
    }

    /// Set the escape guard interval (default 1 s).
    pub fn guard_interval(mut self, interval: Duration) -> Self {
        self.config.guard_interval = interval;
        self
    }

    pub fn escape_timeout(mut self, timeout: Duration) -> Self {
        self.config.escape_timeout = timeout;
        self
    }

    pub fn reset_settle(mut self, settle: Duration) -> Self {
        self.config.reset_settle = settle;
        self
    }

    pub fn identity_timeout(mut self, timeout: Duration) -> Self {
        self.config.identity_timeout = timeout;
        self
    }

    /// Set the per-command acknowledgement timeout (default 2 s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn persist_timeout(mut self, timeout: Duration) -> Self {
        self.config.persist_timeout = timeout;
        self
    }

    /// Number of register listing lines to log after persisting; 0 skips
    /// the listing.
    pub fn status_lines(mut self, lines: usize) -> Self {
        self.config.status_lines = lines;
        self
    }

    pub fn reboot_settle(mut self, settle: Duration) -> Self {
        self.config.reboot_settle = settle;
        self
    }

    /// Bound the whole session.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Session<'a> {
        Session {
            tables: self.tables,
            configuration: self.configuration,
            config: self.config,
        }
    }
}

/// Configures one modem per [`run`](Session::run).
///
/// A session borrows the command tables and configuration read-only, so
/// one `Session` can be run against any number of transports in turn.
pub struct Session<'a> {
    tables: &'a CommandTables,
    configuration: &'a ConfigurationSet,
    config: SessionConfig,
}

impl<'a> Session<'a> {
    pub fn builder(
        tables: &'a CommandTables,
        configuration: &'a ConfigurationSet,
    ) -> SessionBuilder<'a> {
        SessionBuilder::new(tables, configuration)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Configure the modem on `transport`, copying all traffic to
    /// `transcript` when given. The transport is closed on return.
    pub async fn run(
        &self,
        label: &str,
        transport: &mut dyn Transport,
        transcript: Option<&mut (dyn Write + Send)>,
    ) -> SessionReport {
        let span = info_span!("session", port = %label);
        self.run_inner(label, transport, transcript)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        label: &str,
        transport: &mut dyn Transport,
        transcript: Option<&mut (dyn Write + Send)>,
    ) -> SessionReport {
        let started = Instant::now();
        let mut line = LineTransport::new(transport).with_terminator(self.config.terminator);
        if let Some(transcript) = transcript {
            line = line.with_transcript(transcript);
        }
        let mut progress = Progress::default();

        let result = match self.config.deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.stages(&mut line, &mut progress)).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::DeadlineExceeded { deadline }),
                }
            }
            None => self.stages(&mut line, &mut progress).await,
        };

        if let Err(e) = line.close().await {
            warn!(error = %e, "closing transport failed");
        }

        let outcome = match result {
            Ok(applied) => SessionOutcome::Applied(applied),
            Err(e) => {
                warn!(error = %e, "session failed");
                SessionOutcome::from(e)
            }
        };
        let elapsed = started.elapsed();
        info!(%outcome, ?elapsed, "session finished");

        SessionReport {
            label: label.to_string(),
            outcome,
            variant: progress.variant,
            device_id: progress.device_id,
            commands: progress.commands,
            elapsed,
        }
    }

    async fn stages(
        &self,
        line: &mut LineTransport<'_>,
        progress: &mut Progress,
    ) -> Result<usize, SessionError> {
        let handshake = enter_command_mode(line, &self.config.handshake_timing()).await?;
        if !handshake.in_command_mode() {
            return Err(SessionError::HandshakeFailed {
                resets: handshake.resets,
            });
        }

        let identity = resolve_identity(
            line,
            self.config.identity_timeout,
            self.config.identity_line_timeout,
        )
        .await?;
        progress.variant = Some(identity.variant);
        progress.device_id = Some(identity.device_id);

        let table = self.tables.for_variant(identity.variant);
        let mut applier = Applier::new(
            table,
            self.config.applier_timing(),
            &mut progress.commands,
        );
        applier
            .run(line, identity.device_id, self.configuration)
            .await
    }
}
