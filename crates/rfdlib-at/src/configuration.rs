//! Network configuration: common settings plus per-device overrides.
//!
//! A [`ConfigurationSet`] is built once per run from the network
//! description and never changes afterwards. For each modem the applier
//! asks it for the *effective* configuration: the common mapping with that
//! device's overrides laid on top.
//!
//! Order matters. The effective mapping lists common keys first, in the
//! order they were written (carrying the override value where one exists),
//! followed by keys that only the override defines, again in written order.
//! Identical input therefore always produces an identical command sequence.

use std::fmt;
use std::str::FromStr;

/// Unique modem identifier reported by `ATI8` (16 hex digits).
///
/// Parsing is case-insensitive and accepts an optional `0x` prefix;
/// `Display` renders the normalised lower-case form without prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn from_u64(raw: u64) -> Self {
        DeviceId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Error returned when a string is not a 16-digit hex device ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id {0:?}: expected 16 hex digits, optionally prefixed with 0x")]
pub struct ParseDeviceIdError(pub String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseDeviceIdError(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(DeviceId)
            .map_err(|_| ParseDeviceIdError(s.to_string()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    /// Sent as `1` / `0`.
    Bool(bool),
    /// Sent verbatim.
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Int(n) => write!(f, "{n}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Int(n)
    }
}

impl From<i32> for ConfigValue {
    fn from(n: i32) -> Self {
        ConfigValue::Int(i64::from(n))
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Text(s.to_string())
    }
}

/// Insertion-ordered mapping from configuration key to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`. An existing key keeps its position and takes the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ConfigMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Common configuration plus per-device overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSet {
    common: ConfigMap,
    devices: Vec<(DeviceId, ConfigMap)>,
}

impl ConfigurationSet {
    pub fn new(common: ConfigMap) -> Self {
        ConfigurationSet {
            common,
            devices: Vec::new(),
        }
    }

    /// Add (or replace) the override section for `id`.
    pub fn with_device(mut self, id: DeviceId, overrides: ConfigMap) -> Self {
        self.set_device(id, overrides);
        self
    }

    /// Replace the common section, keeping device sections.
    pub fn set_common(&mut self, common: ConfigMap) {
        self.common = common;
    }

    pub fn set_device(&mut self, id: DeviceId, overrides: ConfigMap) {
        match self.devices.iter_mut().find(|(d, _)| *d == id) {
            Some(entry) => entry.1 = overrides,
            None => self.devices.push((id, overrides)),
        }
    }

    pub fn common(&self) -> &ConfigMap {
        &self.common
    }

    /// The override section for `id`, if the description has one.
    pub fn device(&self, id: DeviceId) -> Option<&ConfigMap> {
        self.devices.iter().find(|(d, _)| *d == id).map(|(_, m)| m)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &ConfigMap)> {
        self.devices.iter().map(|(d, m)| (*d, m))
    }

    /// Common settings with `id`'s overrides applied on top.
    ///
    /// A device without an override section gets the common settings.
    pub fn effective(&self, id: DeviceId) -> ConfigMap {
        let mut merged = self.common.clone();
        if let Some(overrides) = self.device(id) {
            for (key, value) in overrides.iter() {
                merged.insert(key, value.clone());
            }
        }
        merged
    }
}
