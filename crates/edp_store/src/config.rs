//! Startup configuration and backend selection.
//!
//! # Responsibility
//! - Parse every environment-style setting exactly once into an immutable
//!   `StoreConfig`.
//! - Restrict the backend selector to its enumerated names.
//!
//! # Invariants
//! - An unrecognized backend name is a startup error, never a runtime one.
//! - Selecting `remote` requires both the base URL and the credential.

use crate::store::{RestConfig, DEFAULT_TIMEOUT};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_BACKEND: &str = "EDP_BACKEND";
pub const ENV_SQLITE_PATH: &str = "EDP_SQLITE_PATH";
pub const ENV_REMOTE_URL: &str = "EDP_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "EDP_REMOTE_KEY";
pub const ENV_REMOTE_TIMEOUT_SECS: &str = "EDP_REMOTE_TIMEOUT_SECS";
pub const ENV_CACHE_URL: &str = "EDP_CACHE_URL";
pub const ENV_CACHE_TTL_SECS: &str = "EDP_CACHE_TTL_SECS";

const DEFAULT_SQLITE_PATH: &str = "edp_store.sqlite3";
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Which physical store every repository binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Embedded,
    Remote,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Remote => "remote",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "remote" => Ok(Self::Remote),
            _ => Err(ConfigError::UnknownBackend(value.trim().to_string())),
        }
    }
}

/// Where cached copies live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    Disabled,
    /// In-process map; not shared between processes.
    Memory,
    /// `redis://` or `rediss://` connection string.
    Redis(String),
}

impl FromStr for CacheTarget {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::Disabled),
            "memory" => Ok(Self::Memory),
            lower if lower.starts_with("redis://") || lower.starts_with("rediss://") => {
                Ok(Self::Redis(trimmed.to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key: ENV_CACHE_URL,
                reason: "expected redis://…, memory or none".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub target: CacheTarget,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            target: CacheTarget::Disabled,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Immutable settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub sqlite_path: PathBuf,
    /// Present whenever `backend` is `Remote`.
    pub remote: Option<RestConfig>,
    pub cache: CacheConfig,
}

impl StoreConfig {
    /// Embedded backend at `path` with caching disabled.
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Embedded,
            sqlite_path: path.into(),
            remote: None,
            cache: CacheConfig::default(),
        }
    }

    /// Remote backend with caching disabled.
    pub fn remote(rest: RestConfig) -> Self {
        Self {
            backend: BackendKind::Remote,
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            remote: Some(rest),
            cache: CacheConfig::default(),
        }
    }

    pub fn with_cache(mut self, target: CacheTarget, ttl: Duration) -> Self {
        self.cache = CacheConfig { target, ttl };
        self
    }

    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, so callers and tests can supply
    /// values without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let backend: BackendKind = read(ENV_BACKEND)
            .ok_or(ConfigError::Missing(ENV_BACKEND))?
            .parse()?;

        let sqlite_path = read(ENV_SQLITE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));

        let remote = match backend {
            BackendKind::Embedded => None,
            BackendKind::Remote => {
                let base_url = read(ENV_REMOTE_URL).ok_or(ConfigError::Missing(ENV_REMOTE_URL))?;
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    return Err(ConfigError::Invalid {
                        key: ENV_REMOTE_URL,
                        reason: "must start with http:// or https://".to_string(),
                    });
                }
                let api_key = read(ENV_REMOTE_KEY).ok_or(ConfigError::Missing(ENV_REMOTE_KEY))?;
                let timeout = match read(ENV_REMOTE_TIMEOUT_SECS) {
                    Some(value) => parse_secs(ENV_REMOTE_TIMEOUT_SECS, &value)?,
                    None => DEFAULT_TIMEOUT,
                };
                Some(RestConfig {
                    base_url,
                    api_key,
                    timeout,
                })
            }
        };

        let target = match read(ENV_CACHE_URL) {
            Some(value) => value.parse()?,
            None => CacheTarget::Disabled,
        };
        let ttl = match read(ENV_CACHE_TTL_SECS) {
            Some(value) => parse_secs(ENV_CACHE_TTL_SECS, &value)?,
            None => DEFAULT_CACHE_TTL,
        };

        Ok(Self {
            backend,
            sqlite_path,
            remote,
            cache: CacheConfig { target, ttl },
        })
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("`{value}` is not a positive number of seconds"),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    UnknownBackend(String),
    Invalid { key: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required setting {key}"),
            Self::UnknownBackend(value) => write!(
                f,
                "unsupported backend `{value}`; expected embedded|remote"
            ),
            Self::Invalid { key, reason } => write!(f, "invalid {key}: {reason}"),
        }
    }
}

impl Error for ConfigError {}
