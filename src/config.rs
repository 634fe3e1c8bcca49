use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::*;

/// Capacity rules that vary per deployment.
///
/// Both daily caps are enforced unless switched off; `None` disables a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub collection_daily_cap: Option<u32>,
    pub client_daily_cap: Option<u32>,
    /// Bookable slots per working day, used for the dashboard capacity figure.
    pub slots_per_day: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            collection_daily_cap: Some(DEFAULT_COLLECTION_DAILY_CAP),
            client_daily_cap: Some(DEFAULT_CLIENT_DAILY_CAP),
            slots_per_day: DEFAULT_SLOTS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.key, self.value)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Journal appends after which the compactor rewrites the journal.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy: SchedulingPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let metrics_port = match lookup("VITRINE_METRICS_PORT") {
            Some(raw) => Some(parse_value("VITRINE_METRICS_PORT", raw)?),
            None => None,
        };
        Ok(Self {
            bind: lookup("VITRINE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "VITRINE_PORT", 5434)?,
            data_dir: PathBuf::from(lookup("VITRINE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parse_or(&lookup, "VITRINE_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "VITRINE_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            policy: SchedulingPolicy {
                collection_daily_cap: parse_cap(
                    &lookup,
                    "VITRINE_COLLECTION_DAILY_CAP",
                    DEFAULT_COLLECTION_DAILY_CAP,
                )?,
                client_daily_cap: parse_cap(
                    &lookup,
                    "VITRINE_CLIENT_DAILY_CAP",
                    DEFAULT_CLIENT_DAILY_CAP,
                )?,
                slots_per_day: parse_or(&lookup, "VITRINE_SLOTS_PER_DAY", DEFAULT_SLOTS_PER_DAY)?,
            },
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("vitrine.journal")
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError { key, value: raw })
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parse_value(key, raw),
        None => Ok(default),
    }
}

/// `0`, `off` and `none` switch a cap off.
fn parse_cap(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u32,
) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(Some(default));
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(None),
        _ => {
            let cap: u32 = parse_value(key, raw)?;
            Ok((cap > 0).then_some(cap))
        }
    }
}
