//! Stressor options
//!
//! Options are declared statically per stressor and resolved once at plan
//! time: user overrides are validated against the declaration and missing
//! values fall back to the declared default.

use crate::{CoreError, StressorDef};
use std::collections::BTreeMap;

/// Value type of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Plain unsigned integer
    Count,
    /// Byte size with optional k/m/g suffix
    Bytes,
}

/// Static option declaration
#[derive(Debug)]
pub struct OptionDef {
    /// Option name, e.g. `vm-bytes`
    pub name: &'static str,
    /// Value type
    pub kind: OptionKind,
    /// Default value in its textual form
    pub default: &'static str,
    /// One-line help
    pub help: &'static str,
}

/// Resolved option values for one stressor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StressorOptions {
    values: BTreeMap<String, String>,
}

impl StressorOptions {
    /// Defaults of `def` overlaid with the overrides it declares.
    ///
    /// Overrides naming options `def` does not declare are ignored here; the
    /// planner rejects names no selected stressor declares.
    pub fn resolve(def: &StressorDef, overrides: &BTreeMap<String, String>) -> Result<Self, CoreError> {
        let mut values = BTreeMap::new();
        for option in def.options {
            let value = overrides
                .get(option.name)
                .map(String::as_str)
                .unwrap_or(option.default);
            validate(option, value)?;
            values.insert(option.name.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    /// Raw textual value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace a value (used by `set_limit` hooks)
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Integer value, 0 if absent or unparsable
    pub fn count(&self, name: &str) -> u64 {
        self.get(name).and_then(|v| v.trim().parse().ok()).unwrap_or(0)
    }

    /// Byte value, 0 if absent or unparsable
    pub fn bytes(&self, name: &str) -> u64 {
        self.get(name).and_then(|v| parse_bytes(v).ok()).unwrap_or(0)
    }

    /// Iterate name/value pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn validate(option: &OptionDef, value: &str) -> Result<(), CoreError> {
    let invalid = |reason: String| CoreError::InvalidOption {
        option: option.name.to_string(),
        value: value.to_string(),
        reason,
    };
    match option.kind {
        OptionKind::Count => value
            .trim()
            .parse::<u64>()
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        OptionKind::Bytes => parse_bytes(value).map(|_| ()).map_err(invalid),
    }
}

/// Parse a byte size such as `4096`, `64k`, `32m`, `1g` (binary multiples).
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let s = s.trim().to_ascii_lowercase();
    let s = s.strip_suffix('b').unwrap_or(&s);
    let (num, multiplier) = match s.chars().last() {
        Some('k') => (&s[..s.len() - 1], 1u64 << 10),
        Some('m') => (&s[..s.len() - 1], 1u64 << 20),
        Some('g') => (&s[..s.len() - 1], 1u64 << 30),
        _ => (s, 1),
    };
    let num: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("not a byte size: {:?}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("byte size overflows: {:?}", s))
}
