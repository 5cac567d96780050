//! Applies a device's effective configuration and persists it.
//!
//! Each key of the effective configuration becomes one command line; every
//! line must be acknowledged with `OK` before the next is sent. The first
//! failure stops the run and nothing further is written. After the last
//! setting the modem's debug output is switched off, the settings are
//! written to EEPROM and the modem is rebooted so they take effect.

use std::time::Duration;

use tracing::{debug, info, warn};

use rfdlib_core::error::Error;

use crate::commands::{CommandTable, CommandTables, RadioVariant};
use crate::configuration::{ConfigValue, ConfigurationSet, DeviceId};
use crate::error::SessionError;
use crate::line::{LineTransport, Pattern};

/// Disable debug output.
pub const DEBUG_OFF_COMMAND: &str = "AT&T";

/// Write settings to EEPROM.
pub const PERSIST_COMMAND: &str = "AT&W";

/// List all registers.
pub const STATUS_COMMAND: &str = "ATI5";

/// Reboot.
pub const REBOOT_COMMAND: &str = "ATZ";

/// One resolved configuration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    /// Configuration key the command sets.
    pub key: String,
    /// Command line without terminator.
    pub line: String,
}

/// Resolve a single key against `table`.
fn resolve(
    table: &CommandTable,
    key: &str,
    value: &ConfigValue,
) -> Result<PlannedCommand, SessionError> {
    let spec = table.get(key).ok_or_else(|| SessionError::UnresolvedKey {
        key: key.to_string(),
        variant: table.variant(),
    })?;

    let value = value.to_string();
    let invalid = |reason: String| SessionError::InvalidValue {
        key: key.to_string(),
        value: value.clone(),
        reason,
    };
    if value.contains(['\r', '\n']) {
        return Err(invalid("contains a line break".into()));
    }
    if let Some(validator) = spec.validator() {
        validator.check(&value).map_err(invalid)?;
    }

    Ok(PlannedCommand {
        key: key.to_string(),
        line: spec.render(&value),
    })
}

/// Resolve the full configuration command sequence for one device without
/// touching a transport.
pub fn plan_commands(
    variant: RadioVariant,
    device_id: DeviceId,
    configuration: &ConfigurationSet,
    tables: &CommandTables,
) -> Result<Vec<PlannedCommand>, SessionError> {
    let table = tables.for_variant(variant);
    configuration
        .effective(device_id)
        .iter()
        .map(|(key, value)| resolve(table, key, value))
        .collect()
}

/// Applier timing.
#[derive(Debug, Clone)]
pub struct ApplierTiming {
    /// Wait for `OK` after each configuration command.
    pub command_timeout: Duration,
    /// Wait for `OK` after `AT&W`.
    pub persist_timeout: Duration,
    /// Discard window after `AT&T`.
    pub debug_drain: Duration,
    /// Register listing lines to read after persisting; 0 skips the listing.
    pub status_lines: usize,
    /// Wait for each listing line.
    pub status_line_timeout: Duration,
    /// Pause after `ATZ` before the link is released.
    pub reboot_settle: Duration,
}

impl Default for ApplierTiming {
    fn default() -> Self {
        ApplierTiming {
            command_timeout: Duration::from_secs(2),
            persist_timeout: Duration::from_secs(2),
            debug_drain: Duration::from_millis(200),
            status_lines: 25,
            status_line_timeout: Duration::from_millis(200),
            reboot_settle: Duration::from_secs(1),
        }
    }
}

/// Applies one device's configuration over a line transport.
///
/// Each configuration command is appended to the caller's `sent` log as
/// soon as it is written, so the log stays accurate when a run fails or
/// its future is dropped part way through.
pub struct Applier<'t> {
    table: &'t CommandTable,
    timing: ApplierTiming,
    sent: &'t mut Vec<String>,
}

impl<'t> Applier<'t> {
    pub fn new(
        table: &'t CommandTable,
        timing: ApplierTiming,
        sent: &'t mut Vec<String>,
    ) -> Self {
        Applier {
            table,
            timing,
            sent,
        }
    }

    /// Configuration command lines sent so far.
    pub fn sent(&self) -> &[String] {
        self.sent.as_slice()
    }

    /// Apply, persist and reboot. Returns the number of settings applied.
    pub async fn run(
        &mut self,
        line: &mut LineTransport<'_>,
        device_id: DeviceId,
        configuration: &ConfigurationSet,
    ) -> Result<usize, SessionError> {
        let applied = self.apply(line, device_id, configuration).await?;
        self.persist(line).await?;
        self.status(line).await?;
        self.reboot(line).await?;
        Ok(applied)
    }

    /// Send each setting in merge order, verifying every acknowledgement.
    pub async fn apply(
        &mut self,
        line: &mut LineTransport<'_>,
        device_id: DeviceId,
        configuration: &ConfigurationSet,
    ) -> Result<usize, SessionError> {
        let ack = Pattern::literal("OK");
        let effective = configuration.effective(device_id);
        info!(%device_id, keys = effective.len(), "applying configuration");

        for (key, value) in effective.iter() {
            let command = resolve(self.table, key, value)?;
            line.send_line(&command.line).await?;
            self.sent.push(command.line.clone());

            match line.expect(&ack, self.timing.command_timeout).await {
                Ok(_) => debug!(key, command = %command.line, "acknowledged"),
                Err(Error::Timeout) => {
                    let response = line.take_pending().trim().to_string();
                    warn!(key, command = %command.line, %response, "command rejected");
                    return Err(SessionError::CommandRejected {
                        key: command.key,
                        command: command.line,
                        response,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(effective.len())
    }

    /// Disable debug output and write the settings to EEPROM.
    pub async fn persist(&mut self, line: &mut LineTransport<'_>) -> Result<(), SessionError> {
        line.send_line(DEBUG_OFF_COMMAND).await?;
        let discarded = line.drain(self.timing.debug_drain).await?;
        if !discarded.is_empty() {
            debug!(discarded = ?discarded, "after debug off");
        }

        line.send_line(PERSIST_COMMAND).await?;
        match line
            .expect(&Pattern::literal("OK"), self.timing.persist_timeout)
            .await
        {
            Ok(_) => {
                info!("settings persisted");
                Ok(())
            }
            Err(Error::Timeout) => {
                let response = line.take_pending().trim().to_string();
                warn!(%response, "persist not acknowledged");
                Err(SessionError::PersistFailed { response })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Log the modem's register listing. Never affects the outcome.
    pub async fn status(&mut self, line: &mut LineTransport<'_>) -> Result<(), SessionError> {
        if self.timing.status_lines == 0 {
            return Ok(());
        }
        line.send_line(STATUS_COMMAND).await?;
        for _ in 0..self.timing.status_lines {
            match line.read_line(self.timing.status_line_timeout).await {
                Ok(text) if text.trim().is_empty() => {}
                Ok(text) => info!(register = %text.trim(), "status"),
                Err(Error::Timeout) => break,
                Err(e) => return Err(e.into()),
            }
        }
        let rest = line.take_pending();
        if !rest.trim().is_empty() {
            debug!(rest = ?rest, "unread status output");
        }
        Ok(())
    }

    /// Reboot without waiting for a reply, then let the modem settle.
    pub async fn reboot(&mut self, line: &mut LineTransport<'_>) -> Result<(), SessionError> {
        line.send_line(REBOOT_COMMAND).await?;
        tokio::time::sleep(self.timing.reboot_settle).await;
        info!("modem rebooted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandSpec, Validator};
    use crate::configuration::ConfigMap;
    use rfdlib_test_harness::MockTransport;

    fn dev() -> DeviceId {
        "a1b2c3d4e5f60708".parse().unwrap()
    }

    fn set(common: ConfigMap, overrides: ConfigMap) -> ConfigurationSet {
        ConfigurationSet::new(common).with_device(dev(), overrides)
    }

    fn lines(plan: &[PlannedCommand]) -> Vec<&str> {
        plan.iter().map(|c| c.line.as_str()).collect()
    }

    #[test]
    fn plan_follows_merge_order() {
        let configuration = set(
            [("air_speed", 64), ("netid", 1), ("txpower", 20)]
                .into_iter()
                .collect(),
            [("nodeid", 2), ("netid", 25)].into_iter().collect(),
        );
        let plan = plan_commands(
            RadioVariant::Multipoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap();
        assert_eq!(
            lines(&plan),
            vec!["ATS2=64", "ATS3=25", "ATS4=20", "ATS18=2"]
        );
        assert_eq!(plan[1].key, "netid");
    }

    #[test]
    fn plan_uses_variant_table() {
        let configuration = set(
            [("air_speed", 64), ("txpower", 30)].into_iter().collect(),
            ConfigMap::new(),
        );
        let plan = plan_commands(
            RadioVariant::AsyncPointToPoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap();
        assert_eq!(lines(&plan), vec!["ATS2=64", "ATS12=30"]);
    }

    #[test]
    fn plan_formats_booleans() {
        let configuration = set(
            [("rtscts", ConfigValue::Bool(true))].into_iter().collect(),
            ConfigMap::new(),
        );
        let plan = plan_commands(
            RadioVariant::Multipoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap();
        assert_eq!(lines(&plan), vec!["ATS13=1"]);
    }

    #[test]
    fn plan_rejects_unknown_key() {
        let configuration = set(
            [("air_speed", 64), ("nodecount0", 3)].into_iter().collect(),
            ConfigMap::new(),
        );
        let err = plan_commands(
            RadioVariant::AsyncPointToPoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::UnresolvedKey { ref key, .. } if key == "nodecount0"));
    }

    #[test]
    fn plan_runs_validators() {
        let configuration = set(
            [("mavlink", 7)].into_iter().collect(),
            ConfigMap::new(),
        );
        let err = plan_commands(
            RadioVariant::AsyncPointToPoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidValue { ref key, ref value, .. } if key == "mavlink" && value == "7"
        ));
    }

    #[test]
    fn plan_rejects_line_breaks() {
        let configuration = set(
            [("encryption_key", "00\r\nATZ")].into_iter().collect(),
            ConfigMap::new(),
        );
        let err = plan_commands(
            RadioVariant::Multipoint,
            dev(),
            &configuration,
            &CommandTables::builtin(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidValue { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn apply_sends_in_merge_order() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let configuration = set(
            [("air_speed", 64), ("netid", 1)].into_iter().collect(),
            [("netid", 25), ("nodeid", 3)].into_iter().collect(),
        );
        let mut mock = MockTransport::new();
        mock.expect(b"ATS2=64\r\n", b"ATS2=64\r\nOK\r\n");
        mock.expect(b"ATS3=25\r\n", b"ATS3=25\r\nOK\r\n");
        mock.expect(b"ATS18=3\r\n", b"ATS18=3\r\nOK\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let applied = {
            let mut line = LineTransport::new(&mut mock);
            applier.apply(&mut line, dev(), &configuration).await.unwrap()
        };
        assert_eq!(applied, 3);
        assert_eq!(applier.sent(), ["ATS2=64", "ATS3=25", "ATS18=3"]);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_key_sends_nothing_further() {
        let table = CommandTable::builtin(RadioVariant::AsyncPointToPoint);
        let configuration = set(
            [("air_speed", 64), ("nodecount0", 3), ("netid", 25)]
                .into_iter()
                .collect(),
            ConfigMap::new(),
        );
        let mut mock = MockTransport::new();
        mock.expect(b"ATS2=64\r\n", b"OK\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let result = {
            let mut line = LineTransport::new(&mut mock);
            applier.apply(&mut line, dev(), &configuration).await
        };
        assert!(matches!(
            result,
            Err(SessionError::UnresolvedKey { ref key, variant: RadioVariant::AsyncPointToPoint })
                if key == "nodecount0"
        ));
        assert_eq!(mock.sent_text(), vec!["ATS2=64\r\n"]);
        assert_eq!(sent, vec!["ATS2=64".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_command_carries_response() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let configuration = set(
            [("air_speed", 64), ("netid", 25)].into_iter().collect(),
            ConfigMap::new(),
        );
        let mut mock = MockTransport::new();
        mock.expect(b"ATS2=64\r\n", b"ERROR\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let result = {
            let mut line = LineTransport::new(&mut mock);
            applier.apply(&mut line, dev(), &configuration).await
        };
        match result {
            Err(SessionError::CommandRejected {
                key,
                command,
                response,
            }) => {
                assert_eq!(key, "air_speed");
                assert_eq!(command, "ATS2=64");
                assert_eq!(response, "ERROR");
            }
            other => panic!("expected CommandRejected, got {other:?}"),
        }
        assert_eq!(mock.sent_text(), vec!["ATS2=64\r\n"]);
    }

    #[tokio::test(start_paused = true)]
    async fn overridden_table_entry_is_used() {
        let mut table = CommandTable::builtin(RadioVariant::AsyncPointToPoint);
        table.merge([CommandSpec::new("netid", "ATS6={}")
            .unwrap()
            .with_validator(Validator::Range { min: 0, max: 499 })]);
        let configuration = set([("netid", 25)].into_iter().collect(), ConfigMap::new());
        let mut mock = MockTransport::new();
        mock.expect(b"ATS6=25\r\n", b"OK\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let mut line = LineTransport::new(&mut mock);
        assert_eq!(applier.apply(&mut line, dev(), &configuration).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persist_ignores_debug_off_acknowledgement() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let mut mock = MockTransport::new();
        mock.expect(b"AT&T\r\n", b"OK\r\n");
        mock.expect_silence(b"AT&W\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let result = {
            let mut line = LineTransport::new(&mut mock);
            applier.persist(&mut line).await
        };
        assert!(matches!(result, Err(SessionError::PersistFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn persist_failure_carries_response() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let mut mock = MockTransport::new();
        mock.expect(b"AT&T\r\n", b"OK\r\n");
        mock.expect(b"AT&W\r\n", b"ERROR\r\n");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let mut line = LineTransport::new(&mut mock);
        match applier.persist(&mut line).await {
            Err(SessionError::PersistFailed { response }) => assert_eq!(response, "ERROR"),
            other => panic!("expected PersistFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_listing_is_bounded() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let listing: Vec<u8> = (0..40)
            .flat_map(|i| format!("S{i}:REG={i}\r\n").into_bytes())
            .collect();
        let mut mock = MockTransport::new();
        mock.expect(b"ATI5\r\n", &listing);

        let timing = ApplierTiming {
            status_lines: 5,
            ..ApplierTiming::default()
        };
        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, timing, &mut sent);
        let mut line = LineTransport::new(&mut mock);
        applier.status(&mut line).await.unwrap();
        assert_eq!(line.pending_text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn status_listing_can_be_disabled() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let mut mock = MockTransport::new();
        let timing = ApplierTiming {
            status_lines: 0,
            ..ApplierTiming::default()
        };
        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, timing, &mut sent);
        {
            let mut line = LineTransport::new(&mut mock);
            applier.status(&mut line).await.unwrap();
        }
        assert!(mock.sent_text().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_persists_and_reboots() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        let configuration = set([("air_speed", 64)].into_iter().collect(), ConfigMap::new());
        let mut mock = MockTransport::new();
        mock.expect(b"ATS2=64\r\n", b"OK\r\n");
        mock.expect(b"AT&T\r\n", b"OK\r\n");
        mock.expect(b"AT&W\r\n", b"OK\r\n");
        mock.expect(b"ATI5\r\n", b"S0:FORMAT=27\r\nS1:SERIAL_SPEED=57\r\n");
        mock.expect(b"ATZ\r\n", b"");

        let mut sent = Vec::new();
        let mut applier = Applier::new(&table, ApplierTiming::default(), &mut sent);
        let applied = {
            let mut line = LineTransport::new(&mut mock);
            applier.run(&mut line, dev(), &configuration).await.unwrap()
        };
        assert_eq!(applied, 1);
        assert_eq!(
            mock.sent_text(),
            vec!["ATS2=64\r\n", "AT&T\r\n", "AT&W\r\n", "ATI5\r\n", "ATZ\r\n"]
        );
    }
}
