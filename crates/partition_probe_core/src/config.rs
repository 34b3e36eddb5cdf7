//! Session configuration for the data access facade.
//!
//! # Responsibility
//! - Hold endpoints, keyspace, consistency and timeouts for one session.
//! - Layer defaults, JSON file values and `PROBE_*` environment overrides.
//!
//! # Invariants
//! - A validated config has at least one non-empty endpoint.
//! - Keyspace names are plain identifiers, safe to embed in node file names.
//! - Both timeouts are non-zero and at most `MAX_TIMEOUT_MS`.

use crate::model::consistency::ConsistencyLevel;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENDPOINTS: &str = "PROBE_ENDPOINTS";
pub const ENV_KEYSPACE: &str = "PROBE_KEYSPACE";
pub const ENV_CONSISTENCY: &str = "PROBE_CONSISTENCY";
pub const ENV_TIMEOUT_MS: &str = "PROBE_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "PROBE_CONNECT_TIMEOUT_MS";

const DEFAULT_KEYSPACE: &str = "reproduction";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Node lock waits are configured in signed 32-bit milliseconds.
pub const MAX_TIMEOUT_MS: u64 = i32::MAX as u64;
const DEFAULT_ENDPOINTS: &[&str] = &[
    "file:probe-data/node-1",
    "file:probe-data/node-2",
    "file:probe-data/node-3",
];

static KEYSPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,47}$").expect("valid keyspace regex"));

/// Facade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Cluster entry points, one per replica node.
    pub endpoints: Vec<String>,
    /// Logical namespace.
    pub keyspace: String,
    /// Applied to both reads and writes.
    pub consistency: ConsistencyLevel,
    /// Per-operation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Session establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| (*e).to_string()).collect(),
            keyspace: DEFAULT_KEYSPACE.to_string(),
            consistency: ConsistencyLevel::Quorum,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ProbeConfig {
    /// Builds a config for the given endpoints with all other values defaulted.
    pub fn with_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parses a JSON config document. Missing fields keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Loads a JSON config file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `PROBE_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Applies `PROBE_*` overrides from an arbitrary variable lookup.
    ///
    /// Unset or blank variables leave the current value untouched.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get(ENV_ENDPOINTS) {
            self.endpoints = raw
                .split(',')
                .map(|endpoint| endpoint.trim().to_string())
                .collect();
        }
        if let Some(raw) = get(ENV_KEYSPACE) {
            self.keyspace = raw.trim().to_string();
        }
        if let Some(raw) = get(ENV_CONSISTENCY) {
            self.consistency = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_CONSISTENCY,
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            self.timeout_ms = parse_millis(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = parse_millis(ENV_CONNECT_TIMEOUT_MS, &raw)?;
        }
        Ok(())
    }

    /// Validates declaration-level config invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if let Some(index) = self.endpoints.iter().position(|e| e.trim().is_empty()) {
            return Err(ConfigError::EmptyEndpoint(index));
        }
        if !KEYSPACE_RE.is_match(&self.keyspace) {
            return Err(ConfigError::InvalidKeyspace(self.keyspace.clone()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("timeout_ms"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("connect_timeout_ms"));
        }
        if self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::DurationTooLarge("timeout_ms"));
        }
        if self.connect_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::DurationTooLarge("connect_timeout_ms"));
        }
        Ok(())
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        })
}

/// Config loading or validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, err: std::io::Error },
    Parse(serde_json::Error),
    InvalidValue { key: &'static str, value: String },
    NoEndpoints,
    EmptyEndpoint(usize),
    InvalidKeyspace(String),
    ZeroDuration(&'static str),
    DurationTooLarge(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, err } => {
                write!(f, "failed to read config `{}`: {err}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
            Self::NoEndpoints => write!(f, "at least one endpoint is required"),
            Self::EmptyEndpoint(index) => write!(f, "endpoint #{index} is empty"),
            Self::InvalidKeyspace(name) => write!(
                f,
                "invalid keyspace `{name}`; expected a letter followed by up to 47 letters, digits or underscores"
            ),
            Self::ZeroDuration(key) => write!(f, "{key} must be greater than zero"),
            Self::DurationTooLarge(key) => {
                write!(f, "{key} must not exceed {MAX_TIMEOUT_MS}ms")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { err, .. } => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}
