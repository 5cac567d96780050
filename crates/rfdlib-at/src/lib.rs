//! rfdlib-at: AT command-mode driver for RFD900-family radio modems.
//!
//! This crate drives the SiK AT command protocol over any
//! [`Transport`](rfdlib_core::Transport): it escapes the modem into command
//! mode, identifies the firmware variant and device ID, translates a
//! declarative configuration into variant-specific register writes,
//! verifies each one, persists the result and reboots the modem.
//!
//! # Architecture
//!
//! - [`line`] -- line protocol: raw/line writes and timeout-bounded pattern
//!   matching over a retained receive buffer
//! - [`handshake`] -- bounded state machine that gets the modem into
//!   command mode from an unknown state
//! - [`identity`] -- firmware variant and device ID detection
//! - [`commands`] -- per-variant command tables
//! - [`configuration`] -- common + per-device configuration and the merge rule
//! - [`applier`] -- applies, verifies and persists a configuration
//! - [`session`] -- orchestrates one device session into a single outcome
//!
//! # Example
//!
//! ```no_run
//! use rfdlib_at::{CommandTables, ConfigMap, ConfigValue, ConfigurationSet, Session};
//! use rfdlib_transport::SerialTransport;
//!
//! # async fn example() -> rfdlib_core::Result<()> {
//! let mut common = ConfigMap::new();
//! common.insert("air_speed", ConfigValue::Int(64));
//! let configuration = ConfigurationSet::new(common);
//! let tables = CommandTables::builtin();
//!
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 57600).await?;
//! let session = Session::builder(&tables, &configuration).build();
//! let report = session.run("/dev/ttyUSB0", &mut transport, None).await;
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod commands;
pub mod configuration;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod line;
pub mod session;

pub use applier::{plan_commands, Applier, ApplierTiming, PlannedCommand};
pub use commands::{CommandSpec, CommandTable, CommandTables, RadioVariant, Validator};
pub use configuration::{ConfigMap, ConfigValue, ConfigurationSet, DeviceId, ParseDeviceIdError};
pub use error::{SessionError, TableError};
pub use handshake::{enter_command_mode, HandshakeReport, HandshakeState, HandshakeTiming};
pub use identity::{detect_variant, resolve_identity, Identity};
pub use line::{LineTransport, Match, Pattern};
pub use session::{Session, SessionBuilder, SessionConfig, SessionOutcome, SessionReport};
