//! Known `[mysqld]` keys, their value grammars and canonical forms.

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const INTEGER_KEYS: &[&str] = &[
    "max_connections",
    "innodb_buffer_pool_instances",
    "innodb_io_capacity",
    "innodb_io_capacity_max",
    "thread_cache_size",
    "table_open_cache",
    "max_connect_errors",
    "open_files_limit",
    "server_id",
    "port",
];

const BOOLEAN_KEYS: &[&str] = &[
    "slow_query_log",
    "skip_name_resolve",
    "general_log",
    "innodb_file_per_table",
    "performance_schema",
    "read_only",
    "super_read_only",
];

const SIZE_KEYS: &[&str] = &[
    "innodb_buffer_pool_size",
    "innodb_log_file_size",
    "innodb_log_buffer_size",
    "innodb_redo_log_capacity",
    "tmp_table_size",
    "max_heap_table_size",
    "max_allowed_packet",
    "sort_buffer_size",
    "join_buffer_size",
    "key_buffer_size",
];

const SIZE_UNITS: &[(char, u32)] = &[('K', 1), ('M', 2), ('G', 3), ('T', 4), ('P', 5)];

static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static SIZE_REGEX: OnceLock<Regex> = OnceLock::new();

fn key_regex() -> &'static Regex {
    KEY_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("static regex pattern is valid")
    })
}

fn size_regex() -> &'static Regex {
    SIZE_REGEX.get_or_init(|| {
        Regex::new(r"^(?i)([0-9]+)([KMGTP])?$").expect("static regex pattern is valid")
    })
}

/// Value grammar of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Boolean,
    Size,
    /// Not in the schema; any single-line string.
    Raw,
}

impl ParamType {
    /// Human-readable grammar, used in `InvalidValue` errors.
    pub fn expected(&self) -> &'static str {
        match self {
            ParamType::Integer => "an unsigned integer ([0-9]+)",
            ParamType::Boolean => "one of true, false, on, off, 1, 0",
            ParamType::Size => "a size such as 512M or 2G ([0-9]+[KMGTP]?, 1024-based)",
            ParamType::Raw => "a single-line value",
        }
    }
}

/// A parsed configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Integer(u64),
    Boolean(bool),
    SizeBytes(u64),
    RawString(String),
}

impl ParamValue {
    /// Canonical textual form, as written to `my.cnf`.
    pub fn canonical(&self) -> String {
        match self {
            ParamValue::Integer(n) => n.to_string(),
            ParamValue::Boolean(true) => "ON".to_string(),
            ParamValue::Boolean(false) => "OFF".to_string(),
            ParamValue::SizeBytes(bytes) => format_size(*bytes),
            ParamValue::RawString(s) => s.clone(),
        }
    }

    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Integer(_) => ParamType::Integer,
            ParamValue::Boolean(_) => ParamType::Boolean,
            ParamValue::SizeBytes(_) => ParamType::Size,
            ParamValue::RawString(_) => ParamType::Raw,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Lowercase and fold `-` to `_`, so `innodb-buffer-pool-size` and
/// `innodb_buffer_pool_size` name the same key.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

pub fn validate_key(key: &str) -> Result<()> {
    if key_regex().is_match(key) {
        Ok(())
    } else {
        Err(Error::InvalidValue {
            key: key.to_string(),
            value: key.to_string(),
            expected: "a key matching [A-Za-z][A-Za-z0-9_-]*".to_string(),
        })
    }
}

pub fn param_type(key: &str) -> ParamType {
    let key = normalize_key(key);
    if INTEGER_KEYS.contains(&key.as_str()) {
        ParamType::Integer
    } else if BOOLEAN_KEYS.contains(&key.as_str()) {
        ParamType::Boolean
    } else if SIZE_KEYS.contains(&key.as_str()) {
        ParamType::Size
    } else {
        ParamType::Raw
    }
}

/// Strictly parse operator input for `key`.
pub fn parse_value(key: &str, raw: &str) -> Result<ParamValue> {
    let ty = param_type(key);
    let invalid = || Error::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        expected: ty.expected().to_string(),
    };
    let trimmed = raw.trim();

    match ty {
        ParamType::Integer => parse_integer(trimmed)
            .map(ParamValue::Integer)
            .ok_or_else(invalid),
        ParamType::Boolean => parse_boolean(trimmed)
            .map(ParamValue::Boolean)
            .ok_or_else(invalid),
        ParamType::Size => parse_size(trimmed)
            .map(ParamValue::SizeBytes)
            .ok_or_else(invalid),
        ParamType::Raw => {
            if raw.contains(['\n', '\r']) {
                Err(invalid())
            } else {
                Ok(ParamValue::RawString(trimmed.to_string()))
            }
        }
    }
}

/// Parse a value found in `my.cnf`. Returns the value and whether it was
/// validated against the schema; values that fail their type fall back to
/// an unvalidated raw string.
///
/// A bare boolean flag (`skip-name-resolve`) means `ON`.
pub fn parse_configured(key: &str, raw: Option<&str>) -> (ParamValue, bool) {
    let ty = param_type(key);
    let Some(raw) = raw else {
        return match ty {
            ParamType::Boolean => (ParamValue::Boolean(true), true),
            _ => (ParamValue::RawString(String::new()), false),
        };
    };
    let raw = unquote(raw.trim());
    match ty {
        ParamType::Raw => (ParamValue::RawString(raw.to_string()), false),
        _ => match parse_value(key, raw) {
            Ok(value) => (value, true),
            Err(_) => (ParamValue::RawString(raw.to_string()), false),
        },
    }
}

/// Parse a value reported by `SHOW GLOBAL VARIABLES` as type `ty`.
///
/// The server reports sizes as plain byte counts and booleans as ON/OFF.
pub fn parse_live(ty: ParamType, raw: &str) -> Option<ParamValue> {
    let raw = raw.trim();
    match ty {
        ParamType::Integer => parse_integer(raw).map(ParamValue::Integer),
        ParamType::Boolean => parse_boolean(raw).map(ParamValue::Boolean),
        ParamType::Size => parse_size(raw).map(ParamValue::SizeBytes),
        ParamType::Raw => Some(ParamValue::RawString(raw.to_string())),
    }
}

fn parse_integer(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// `[0-9]+[KMGTP]?`, case-insensitive, 1024-based.
pub fn parse_size(raw: &str) -> Option<u64> {
    let captures = size_regex().captures(raw)?;
    let number: u64 = captures[1].parse().ok()?;
    let exponent = match captures.get(2) {
        Some(unit) => {
            let unit = unit.as_str().to_ascii_uppercase().chars().next()?;
            SIZE_UNITS.iter().find(|(u, _)| *u == unit)?.1
        }
        None => 0,
    };
    number.checked_mul(1024u64.checked_pow(exponent)?)
}

/// Largest unit that divides `bytes` exactly: 2147483648 → `2G`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (unit, exponent) in SIZE_UNITS.iter().rev() {
        let factor = 1024u64.pow(*exponent);
        if bytes % factor == 0 {
            return format!("{}{}", bytes / factor, unit);
        }
    }
    bytes.to_string()
}

fn unquote(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_1024_units() {
        assert_eq!(parse_size("2G"), Some(2_147_483_648));
        assert_eq!(parse_size("512m"), Some(536_870_912));
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("1.5G"), None);
        assert_eq!(parse_size("99999999999999999999P"), None);
    }

    #[test]
    fn size_canonical_form_uses_largest_exact_unit() {
        assert_eq!(format_size(2_147_483_648), "2G");
        assert_eq!(format_size(1536 * 1024 * 1024), "1536M");
        assert_eq!(format_size(1000), "1000");
        assert_eq!(format_size(0), "0");
    }

    #[test]
    fn booleans_canonicalize_to_on_off() {
        assert_eq!(
            parse_value("slow_query_log", "true").unwrap().canonical(),
            "ON"
        );
        assert_eq!(parse_value("read-only", "0").unwrap().canonical(), "OFF");
        assert!(parse_value("general_log", "maybe").is_err());
    }

    #[test]
    fn integer_rejects_signs_and_units() {
        assert!(parse_value("max_connections", "-1").is_err());
        assert!(parse_value("max_connections", "10K").is_err());
        assert_eq!(
            parse_value("max_connections", "500").unwrap(),
            ParamValue::Integer(500)
        );
    }

    #[test]
    fn invalid_value_reports_grammar() {
        let err = parse_value("innodb_buffer_pool_size", "lots").unwrap_err();
        match err {
            Error::InvalidValue { expected, .. } => assert!(expected.contains("KMGTP")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unknown_keys_are_raw_single_line() {
        assert_eq!(
            parse_value("character_set_server", "utf8mb4").unwrap(),
            ParamValue::RawString("utf8mb4".to_string())
        );
        assert!(parse_value("init_connect", "a\nb").is_err());
    }

    #[test]
    fn dashes_and_underscores_are_equivalent() {
        assert_eq!(param_type("innodb-buffer-pool-size"), ParamType::Size);
        assert_eq!(normalize_key("Max-Connections"), "max_connections");
    }

    #[test]
    fn key_grammar() {
        assert!(validate_key("innodb_buffer_pool_size").is_ok());
        assert!(validate_key("log-error").is_ok());
        assert!(validate_key("1abc").is_err());
        assert!(validate_key("a=b").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn configured_values_fall_back_to_raw() {
        assert_eq!(
            parse_configured("max_connections", Some("\"200\"")),
            (ParamValue::Integer(200), true)
        );
        assert_eq!(
            parse_configured("max_connections", Some("lots")),
            (ParamValue::RawString("lots".to_string()), false)
        );
    }

    #[test]
    fn bare_flags() {
        assert_eq!(
            parse_configured("skip-name-resolve", None),
            (ParamValue::Boolean(true), true)
        );
        assert_eq!(
            parse_configured("log-bin", None),
            (ParamValue::RawString(String::new()), false)
        );
    }

    #[test]
    fn live_sizes_are_byte_counts() {
        assert_eq!(
            parse_live(ParamType::Size, "2147483648"),
            Some(ParamValue::SizeBytes(2_147_483_648))
        );
        assert_eq!(
            parse_live(ParamType::Boolean, "ON"),
            Some(ParamValue::Boolean(true))
        );
    }
}
