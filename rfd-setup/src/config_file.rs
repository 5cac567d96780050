//! YAML network description.
//!
//! ```yaml
//! common:
//!   air_speed: 64
//!   txpower: 20
//! a1b2c3d4e5f60708:
//!   netid: 25
//! command_tables:
//!   async:
//!     max_data: "ATS3={}"
//!     mavlink: { cmd: "ATS13={}", min: 0, max: 2 }
//! ```
//!
//! `common` holds settings for every modem. Every other top-level key except
//! `command_tables` is a device ID and holds that modem's overrides.
//! Device IDs must be quoted when they consist only of digits, otherwise
//! YAML reads them as numbers. Mapping order is preserved throughout.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use rfdlib_at::{
    CommandSpec, CommandTables, ConfigMap, ConfigValue, ConfigurationSet, DeviceId, RadioVariant,
    Validator,
};

const COMMON: &str = "common";
const COMMAND_TABLES: &str = "command_tables";

/// Everything a network description file defines.
#[derive(Debug)]
pub struct NetworkFile {
    pub configuration: ConfigurationSet,
    pub tables: CommandTables,
}

/// Read and parse a network description.
pub fn load(path: &Path) -> Result<NetworkFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse(&text).with_context(|| format!("invalid network description {}", path.display()))
}

/// Parse a network description from YAML text.
pub fn parse(text: &str) -> Result<NetworkFile> {
    let root: Value = serde_yaml::from_str(text).context("failed to parse YAML")?;
    let root = match root {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => bail!("top level must be a mapping"),
    };

    let mut configuration = ConfigurationSet::default();
    let mut tables = CommandTables::builtin();

    for (key, value) in &root {
        let key = key_str(key)?;
        match key {
            COMMON => configuration.set_common(settings(value).context("in common")?),
            COMMAND_TABLES => apply_table_overrides(&mut tables, value)?,
            _ => {
                let id: DeviceId = key.parse()?;
                let overrides = settings(value).with_context(|| format!("in {key}"))?;
                configuration.set_device(id, overrides);
            }
        }
    }

    Ok(NetworkFile {
        configuration,
        tables,
    })
}

fn key_str(key: &Value) -> Result<&str> {
    match key {
        Value::String(s) => Ok(s.as_str()),
        Value::Number(n) => bail!(
            "key {n} was read as a number; quote device ids, e.g. \"{n}\""
        ),
        other => bail!("unsupported key {other:?}"),
    }
}

/// A `key: value` section. An empty section is allowed.
fn settings(value: &Value) -> Result<ConfigMap> {
    let section = match value {
        Value::Mapping(m) => m,
        Value::Null => return Ok(ConfigMap::new()),
        _ => bail!("expected a mapping of settings"),
    };
    let mut map = ConfigMap::new();
    for (key, value) in section {
        let key = key_str(key)?;
        map.insert(key, scalar(value).with_context(|| format!("setting {key}"))?);
    }
    Ok(map)
}

fn scalar(value: &Value) -> Result<ConfigValue> {
    Ok(match value {
        Value::Bool(b) => ConfigValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => ConfigValue::Int(i),
            (None, Some(f)) if n.is_f64() => ConfigValue::Float(f),
            _ => bail!("number {n} out of range"),
        },
        Value::String(s) => ConfigValue::Text(s.clone()),
        other => bail!("expected a scalar value, got {other:?}"),
    })
}

/// A `command_tables` entry: a bare template or a template with a check.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Template(String),
    Detailed(DetailedCommand),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetailedCommand {
    cmd: String,
    min: Option<i64>,
    max: Option<i64>,
    hex_len: Option<usize>,
}

impl RawCommand {
    fn into_spec(self, key: &str) -> Result<CommandSpec> {
        let (template, validator) = match self {
            RawCommand::Template(template) => (template, None),
            RawCommand::Detailed(d) => {
                let validator = match (d.min, d.max, d.hex_len) {
                    (None, None, None) => None,
                    (Some(min), Some(max), None) if min <= max => {
                        Some(Validator::Range { min, max })
                    }
                    (None, None, Some(len)) => Some(Validator::Hex { len }),
                    _ => bail!("{key}: give either min and max (min <= max) or hex_len"),
                };
                (d.cmd, validator)
            }
        };
        let spec = CommandSpec::new(key, template)?;
        Ok(match validator {
            Some(v) => spec.with_validator(v),
            None => spec,
        })
    }
}

fn apply_table_overrides(tables: &mut CommandTables, value: &Value) -> Result<()> {
    let Value::Mapping(per_variant) = value else {
        bail!("{COMMAND_TABLES} must map variant names to tables");
    };
    for (variant, entries) in per_variant {
        let name = key_str(variant)?;
        let variant: RadioVariant = name.parse().map_err(|e: String| anyhow!(e))?;
        let Value::Mapping(entries) = entries else {
            bail!("{COMMAND_TABLES}.{name} must map keys to commands");
        };

        let mut specs = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            let key = key_str(key)?;
            let raw: RawCommand = serde_yaml::from_value(raw.clone())
                .with_context(|| format!("{COMMAND_TABLES}.{name}.{key}"))?;
            specs.push(raw.into_spec(key)?);
        }
        tables.for_variant_mut(variant).merge(specs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceId {
        s.parse().unwrap()
    }

    #[test]
    fn parses_common_and_device_sections() {
        let file = parse(
            "common:\n  air_speed: 64\n  rtscts: true\na1b2c3d4e5f60708:\n  netid: 25\n",
        )
        .unwrap();
        let effective = file.configuration.effective(id("a1b2c3d4e5f60708"));
        assert_eq!(
            effective.iter().map(|(k, v)| (k, v.clone())).collect::<Vec<_>>(),
            vec![
                ("air_speed", ConfigValue::Int(64)),
                ("rtscts", ConfigValue::Bool(true)),
                ("netid", ConfigValue::Int(25)),
            ]
        );
        assert_eq!(file.tables, CommandTables::builtin());
    }

    #[test]
    fn device_before_common_is_kept() {
        let file = parse("a1b2c3d4e5f60708:\n  netid: 25\ncommon:\n  air_speed: 64\n").unwrap();
        let effective = file.configuration.effective(id("a1b2c3d4e5f60708"));
        assert_eq!(effective.keys().collect::<Vec<_>>(), vec!["air_speed", "netid"]);
    }

    #[test]
    fn prefixed_and_upper_case_ids() {
        let file = parse("\"0xA1B2C3D4E5F60708\":\n  netid: 3\n").unwrap();
        assert!(file.configuration.device(id("a1b2c3d4e5f60708")).is_some());
    }

    #[test]
    fn numeric_id_must_be_quoted() {
        let err = parse("1234567890123456:\n  netid: 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("quote device ids"));
    }

    #[test]
    fn malformed_id_is_rejected() {
        assert!(parse("radio1:\n  netid: 3\n").is_err());
    }

    #[test]
    fn nested_values_are_rejected() {
        let err = parse("common:\n  air_speed: [64]\n").unwrap_err();
        assert!(format!("{err:#}").contains("air_speed"));
    }

    #[test]
    fn empty_file_is_empty_configuration() {
        let file = parse("").unwrap();
        assert!(file.configuration.common().is_empty());
        assert_eq!(file.configuration.devices().count(), 0);
    }

    #[test]
    fn floats_and_text() {
        let file = parse("common:\n  min_freq: 915.5\n  encryption_key: \"00ff\"\n").unwrap();
        let common = file.configuration.common();
        assert_eq!(common.get("min_freq"), Some(&ConfigValue::Float(915.5)));
        assert_eq!(common.get("encryption_key"), Some(&ConfigValue::Text("00ff".into())));
    }

    #[test]
    fn command_table_overrides() {
        let file = parse(
            "command_tables:\n  async:\n    netid: \"ATS6={}\"\n    max_data: { cmd: \"ATS3={}\", min: 0, max: 255 }\n  mp:\n    encryption_key: { cmd: \"AT&E={}\", hex_len: 32 }\n",
        )
        .unwrap();
        let table = file.tables.for_variant(RadioVariant::AsyncPointToPoint);
        assert_eq!(table.get("netid").unwrap().template(), "ATS6={}");
        assert_eq!(
            table.get("max_data").unwrap().validator(),
            Some(Validator::Range { min: 0, max: 255 })
        );
        let table = file.tables.for_variant(RadioVariant::Multipoint);
        assert_eq!(
            table.get("encryption_key").unwrap().validator(),
            Some(Validator::Hex { len: 32 })
        );
    }

    #[test]
    fn bad_template_is_rejected() {
        assert!(parse("command_tables:\n  async:\n    netid: \"S3={}\"\n").is_err());
        assert!(parse("command_tables:\n  async:\n    netid: \"ATS3=\"\n").is_err());
        assert!(parse("command_tables:\n  lora:\n    netid: \"ATS3={}\"\n").is_err());
        assert!(
            parse("command_tables:\n  async:\n    netid: { cmd: \"ATS3={}\", min: 5 }\n").is_err()
        );
    }
}
