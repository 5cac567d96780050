//! Per-variant command tables.
//!
//! SiK firmware exposes its settings as numbered S-registers (`ATSn=value`)
//! plus a few ampersand commands, and the register numbering differs between
//! firmware families. A [`CommandTable`] maps the abstract configuration
//! keys used in network descriptions (`air_speed`, `netid`, ...) to the
//! command template for one [`RadioVariant`]; [`CommandTables`] holds one
//! table per variant.
//!
//! The built-in tables cover the common registers of each family. Register
//! layouts vary between firmware builds, so deployments may replace or
//! extend entries with [`CommandTable::merge`].
//!
//! | Key                | Multipoint  | Async P2P |
//! |--------------------|-------------|-----------|
//! | `air_speed`        | `ATS2`      | `ATS2`    |
//! | `netid`            | `ATS3`      | `ATS3`    |
//! | `txpower`          | `ATS4`      | `ATS12`   |
//! | `min_freq`         | `ATS8`      | `ATS14`   |
//! | `max_freq`         | `ATS9`      | `ATS15`   |
//! | `num_channels`     | `ATS10`     | `ATS16`   |
//! | `rtscts`           | `ATS13`     | `ATS18`   |
//! | `encryption_level` | `ATS15`     | `ATS19`   |
//! | `encryption_key`   | `AT&E`      | `AT&E`    |

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::TableError;

/// Substitution slot in a command template.
pub const SLOT: &str = "{}";

/// Firmware family of the attached modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioVariant {
    /// Multipoint SiK firmware (`...MP` version strings).
    Multipoint,
    /// Asynchronous point-to-point firmware (`RFD ASYNC ...`).
    AsyncPointToPoint,
}

impl RadioVariant {
    /// All variants, in table order.
    pub const ALL: [RadioVariant; 2] = [RadioVariant::Multipoint, RadioVariant::AsyncPointToPoint];

    /// Short lower-case name used in configuration files and logs.
    pub fn name(self) -> &'static str {
        match self {
            RadioVariant::Multipoint => "multipoint",
            RadioVariant::AsyncPointToPoint => "async",
        }
    }
}

impl fmt::Display for RadioVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RadioVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multipoint" | "mp" => Ok(RadioVariant::Multipoint),
            "async" | "async_p2p" | "asyncpointtopoint" => Ok(RadioVariant::AsyncPointToPoint),
            other => Err(format!("unknown radio variant {other:?} (expected multipoint or async)")),
        }
    }
}

/// Check applied to a formatted value before its command is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Decimal integer within `min..=max`.
    Range { min: i64, max: i64 },
    /// Exactly `len` hexadecimal digits.
    Hex { len: usize },
}

impl Validator {
    /// Accept or reject `value`, with a reason on rejection.
    pub fn check(&self, value: &str) -> Result<(), String> {
        match *self {
            Validator::Range { min, max } => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("expected an integer in {min}..={max}"))?;
                if (min..=max).contains(&n) {
                    Ok(())
                } else {
                    Err(format!("out of range {min}..={max}"))
                }
            }
            Validator::Hex { len } => {
                if value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    Ok(())
                } else {
                    Err(format!("expected {len} hex digits"))
                }
            }
        }
    }
}

/// One configuration key and the command that sets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    key: Cow<'static, str>,
    template: Cow<'static, str>,
    validator: Option<Validator>,
}

impl CommandSpec {
    /// Build a spec, checking that `template` is an AT command with
    /// exactly one `{}` slot.
    pub fn new(key: impl Into<String>, template: impl Into<String>) -> Result<Self, TableError> {
        let key = key.into();
        let template = template.into();
        check_template(&key, &template)?;
        Ok(CommandSpec {
            key: Cow::Owned(key),
            template: Cow::Owned(template),
            validator: None,
        })
    }

    fn builtin(key: &'static str, template: &'static str, validator: Option<Validator>) -> Self {
        CommandSpec {
            key: Cow::Borrowed(key),
            template: Cow::Borrowed(template),
            validator,
        }
    }

    /// Attach a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn validator(&self) -> Option<Validator> {
        self.validator
    }

    /// Fill the slot with `value`, producing the command line.
    pub fn render(&self, value: &str) -> String {
        self.template.replacen(SLOT, value, 1)
    }
}

fn check_template(key: &str, template: &str) -> Result<(), TableError> {
    if !template.starts_with("AT") {
        return Err(TableError::NotAtCommand {
            key: key.to_string(),
            template: template.to_string(),
        });
    }
    if template.matches(SLOT).count() != 1 {
        return Err(TableError::BadSlot {
            key: key.to_string(),
            template: template.to_string(),
        });
    }
    Ok(())
}

const BOOLEAN: Option<Validator> = Some(Validator::Range { min: 0, max: 1 });

// ---------------------------------------------------------------------------
// Built-in tables
// ---------------------------------------------------------------------------

static MULTIPOINT_COMMANDS: &[(&str, &str, Option<Validator>)] = &[
    ("air_speed", "ATS2={}", None),
    ("netid", "ATS3={}", None),
    ("txpower", "ATS4={}", None),
    ("ecc", "ATS5={}", BOOLEAN),
    ("rxframe", "ATS6={}", None),
    ("min_freq", "ATS8={}", None), // kHz
    ("max_freq", "ATS9={}", None), // kHz
    ("num_channels", "ATS10={}", None),
    ("rtscts", "ATS13={}", BOOLEAN),
    ("max_window", "ATS14={}", None), // ms, bounds latency
    ("encryption_level", "ATS15={}", None),
    ("encryption_key", "AT&E={}", None), // 900x only
    ("target_rssi", "ATR0={}", None),
    ("hysteresis_rssi", "ATR1={}", None),
    ("nodeid", "ATS18={}", None),
    ("nodedestination", "ATS19={}", None),
    ("netcount", "ATS20={}", None),
    ("masterbackup", "ATS22={}", None),
    ("nodecount0", "AT&M0=0,{}", None),
    ("nodecount7", "AT&M1=7,{}", None),
    ("nodecount13", "AT&M2=13,{}", None),
];

static ASYNC_COMMANDS: &[(&str, &str, Option<Validator>)] = &[
    ("air_speed", "ATS2={}", None),
    ("netid", "ATS3={}", None),
    ("max_retries", "ATS4={}", None),
    ("global_retries", "ATS5={}", None), // broadcast retries
    ("txencap", "ATS7={}", None),
    ("rxencap", "ATS8={}", None),
    ("nodeid", "ATS10={}", None),
    ("destid", "ATS11={}", None),
    ("txpower", "ATS12={}", None),
    ("mavlink", "ATS13={}", Some(Validator::Range { min: 0, max: 2 })),
    ("min_freq", "ATS14={}", None),
    ("max_freq", "ATS15={}", None),
    ("num_channels", "ATS16={}", None),
    ("rtscts", "ATS18={}", BOOLEAN),
    ("encryption_level", "ATS19={}", None),
    ("encryption_key", "AT&E={}", None),
];

/// Command table for one radio variant. Keys are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    variant: RadioVariant,
    specs: Vec<CommandSpec>,
}

impl CommandTable {
    /// Build a table, rejecting duplicate keys.
    pub fn new(variant: RadioVariant, specs: Vec<CommandSpec>) -> Result<Self, TableError> {
        for (i, spec) in specs.iter().enumerate() {
            check_template(spec.key(), spec.template())?;
            if specs[..i].iter().any(|s| s.key() == spec.key()) {
                return Err(TableError::DuplicateKey {
                    key: spec.key().to_string(),
                    variant,
                });
            }
        }
        Ok(CommandTable { variant, specs })
    }

    /// The table shipped for `variant`.
    pub fn builtin(variant: RadioVariant) -> Self {
        let rows = match variant {
            RadioVariant::Multipoint => MULTIPOINT_COMMANDS,
            RadioVariant::AsyncPointToPoint => ASYNC_COMMANDS,
        };
        CommandTable {
            variant,
            specs: rows
                .iter()
                .map(|&(key, template, validator)| CommandSpec::builtin(key, template, validator))
                .collect(),
        }
    }

    pub fn variant(&self) -> RadioVariant {
        self.variant
    }

    /// Look up the command for `key`.
    pub fn get(&self, key: &str) -> Option<&CommandSpec> {
        self.specs.iter().find(|s| s.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Replace entries with matching keys in place and append new ones.
    pub fn merge(&mut self, overrides: impl IntoIterator<Item = CommandSpec>) {
        for spec in overrides {
            match self.specs.iter_mut().find(|s| s.key() == spec.key()) {
                Some(existing) => *existing = spec,
                None => self.specs.push(spec),
            }
        }
    }

    /// Drop the entry for `key`, if present.
    pub fn remove(&mut self, key: &str) -> Option<CommandSpec> {
        let pos = self.specs.iter().position(|s| s.key() == key)?;
        Some(self.specs.remove(pos))
    }
}

/// One command table per radio variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTables {
    multipoint: CommandTable,
    async_p2p: CommandTable,
}

impl CommandTables {
    /// The built-in tables for every variant.
    pub fn builtin() -> Self {
        CommandTables {
            multipoint: CommandTable::builtin(RadioVariant::Multipoint),
            async_p2p: CommandTable::builtin(RadioVariant::AsyncPointToPoint),
        }
    }

    /// Assemble from explicit tables.
    pub fn new(multipoint: CommandTable, async_p2p: CommandTable) -> Result<Self, String> {
        if multipoint.variant() != RadioVariant::Multipoint
            || async_p2p.variant() != RadioVariant::AsyncPointToPoint
        {
            return Err("command tables passed for the wrong variants".into());
        }
        Ok(CommandTables {
            multipoint,
            async_p2p,
        })
    }

    pub fn for_variant(&self, variant: RadioVariant) -> &CommandTable {
        match variant {
            RadioVariant::Multipoint => &self.multipoint,
            RadioVariant::AsyncPointToPoint => &self.async_p2p,
        }
    }

    pub fn for_variant_mut(&mut self, variant: RadioVariant) -> &mut CommandTable {
        match variant {
            RadioVariant::Multipoint => &mut self.multipoint,
            RadioVariant::AsyncPointToPoint => &mut self.async_p2p,
        }
    }
}

impl Default for CommandTables {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_are_valid() {
        for variant in RadioVariant::ALL {
            let table = CommandTable::builtin(variant);
            let specs: Vec<CommandSpec> = table.iter().cloned().collect();
            assert_eq!(CommandTable::new(variant, specs).as_ref(), Ok(&table));
        }
    }

    #[test]
    fn shared_registers() {
        let tables = CommandTables::builtin();
        let mp = tables.for_variant(RadioVariant::Multipoint);
        let async_p2p = tables.for_variant(RadioVariant::AsyncPointToPoint);

        assert_eq!(mp.get("air_speed").unwrap().render("64"), "ATS2=64");
        assert_eq!(async_p2p.get("air_speed").unwrap().render("64"), "ATS2=64");
        assert_eq!(mp.get("netid").unwrap().render("25"), "ATS3=25");
        assert_eq!(async_p2p.get("netid").unwrap().render("25"), "ATS3=25");
    }

    #[test]
    fn variant_specific_registers() {
        let tables = CommandTables::builtin();
        let mp = tables.for_variant(RadioVariant::Multipoint);
        let async_p2p = tables.for_variant(RadioVariant::AsyncPointToPoint);

        assert_eq!(mp.get("txpower").unwrap().template(), "ATS4={}");
        assert_eq!(async_p2p.get("txpower").unwrap().template(), "ATS12={}");
        assert_eq!(mp.get("nodecount7").unwrap().render("4"), "AT&M1=7,4");
        assert!(async_p2p.get("nodecount7").is_none());
        assert!(mp.get("mavlink").is_none());
    }

    #[test]
    fn spec_rejects_bad_templates() {
        assert!(matches!(
            CommandSpec::new("netid", "ATS3="),
            Err(TableError::BadSlot { .. })
        ));
        assert!(matches!(
            CommandSpec::new("netid", "ATS3={}{}"),
            Err(TableError::BadSlot { .. })
        ));
        assert!(matches!(
            CommandSpec::new("netid", "S3={}"),
            Err(TableError::NotAtCommand { .. })
        ));
        assert!(CommandSpec::new("netid", "ATS3={}").is_ok());
    }

    #[test]
    fn table_rejects_duplicate_keys() {
        let specs = vec![
            CommandSpec::new("netid", "ATS3={}").unwrap(),
            CommandSpec::new("netid", "ATS9={}").unwrap(),
        ];
        let err = CommandTable::new(RadioVariant::AsyncPointToPoint, specs).unwrap_err();
        assert_eq!(
            err,
            TableError::DuplicateKey {
                key: "netid".into(),
                variant: RadioVariant::AsyncPointToPoint,
            }
        );
    }

    #[test]
    fn merge_replaces_in_place_and_appends() {
        let mut table = CommandTable::builtin(RadioVariant::AsyncPointToPoint);
        let before = table.len();
        table.merge([
            CommandSpec::new("netid", "ATS9={}").unwrap(),
            CommandSpec::new("max_data", "ATS3={}").unwrap(),
        ]);
        assert_eq!(table.len(), before + 1);
        assert_eq!(table.get("netid").unwrap().template(), "ATS9={}");
        assert_eq!(table.iter().nth(1).unwrap().key(), "netid");
        assert_eq!(table.iter().last().unwrap().key(), "max_data");
    }

    #[test]
    fn remove_entry() {
        let mut table = CommandTable::builtin(RadioVariant::Multipoint);
        assert!(table.remove("netid").is_some());
        assert!(table.get("netid").is_none());
        assert!(table.remove("netid").is_none());
    }

    #[test]
    fn validators() {
        let boolean = Validator::Range { min: 0, max: 1 };
        assert!(boolean.check("1").is_ok());
        assert!(boolean.check("2").is_err());
        assert!(boolean.check("yes").is_err());

        let key = Validator::Hex { len: 4 };
        assert!(key.check("a1B2").is_ok());
        assert!(key.check("a1B").is_err());
        assert!(key.check("a1BZ").is_err());
    }

    #[test]
    fn builtin_validators_attached() {
        let table = CommandTable::builtin(RadioVariant::Multipoint);
        assert_eq!(table.get("rtscts").unwrap().validator(), BOOLEAN);
        assert_eq!(table.get("air_speed").unwrap().validator(), None);
    }

    #[test]
    fn tables_for_wrong_variants_rejected() {
        let mp = CommandTable::builtin(RadioVariant::Multipoint);
        let async_p2p = CommandTable::builtin(RadioVariant::AsyncPointToPoint);
        assert!(CommandTables::new(async_p2p.clone(), mp.clone()).is_err());
        assert!(CommandTables::new(mp, async_p2p).is_ok());
    }

    #[test]
    fn variant_names_round_trip() {
        for variant in RadioVariant::ALL {
            assert_eq!(variant.name().parse::<RadioVariant>(), Ok(variant));
        }
        assert_eq!("MP".parse::<RadioVariant>(), Ok(RadioVariant::Multipoint));
        assert!("sik".parse::<RadioVariant>().is_err());
    }
}
