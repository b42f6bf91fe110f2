//! Process configuration.
//!
//! Loaded once at startup: defaults, then an optional TOML file, then
//! environment overrides. The result is validated and never changes for the
//! lifetime of the process.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::contract::ContractVersion;
use crate::error::ConfigError;

/// Default values.
pub mod defaults {
    pub const REDIS_HOST: &str = "redis";
    pub const REDIS_PORT: u16 = 6379;
    pub const REDIS_DB: i64 = 0;
    pub const KEY_PATTERN: &str = "*";
    pub const OP_TIMEOUT_MS: u64 = 3_000;

    pub const BACKOFF_INITIAL_MS: u64 = 200;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const BACKOFF_MAX_MS: u64 = 10_000;
    pub const BACKOFF_MAX_RETRIES: u32 = 8;

    /// Seconds without any producer update before the model is stale.
    pub const STALENESS_WINDOW_SECS: u64 = 5;
    pub const MAX_STALENESS_WINDOW_SECS: u64 = 86_400;
    pub const PROBE_INTERVAL_SECS: u64 = 30;
    pub const COMMAND_QUEUE_CAPACITY: usize = 256;
    pub const DEFAULT_ORIGIN: &str = "micro_sp";

    pub const BIND_HOST: &str = "0.0.0.0";
    pub const BIND_PORT: u16 = 8501;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "SPDASH_CONFIG";
    pub const REDIS_HOST: &str = "REDIS_HOST";
    pub const REDIS_PORT: &str = "REDIS_PORT";
    pub const REDIS_DB: &str = "REDIS_DB";
    pub const REDIS_PASSWORD: &str = "REDIS_PASSWORD";
    pub const STALENESS_SECS: &str = "SPDASH_STALENESS_SECS";
    pub const CONTRACT: &str = "SPDASH_CONTRACT";
    pub const HEARTBEAT_KEY: &str = "SPDASH_HEARTBEAT_KEY";
    pub const BIND_HOST: &str = "SPDASH_BIND_HOST";
    pub const BIND_PORT: &str = "SPDASH_BIND_PORT";
    pub const SCHEMA: &str = "SPDASH_SCHEMA";
    pub const LOG_JSON: &str = "SPDASH_LOG_JSON";
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// `None` retries forever, with delays capped at `max_delay_ms`.
    pub max_retries: Option<u32>,
    /// Shave up to 20% off each delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: defaults::BACKOFF_INITIAL_MS,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            max_delay_ms: defaults::BACKOFF_MAX_MS,
            max_retries: Some(defaults::BACKOFF_MAX_RETRIES),
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.min(64) as i32);
        let raw = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        let ms = if self.jitter {
            raw * rand::thread_rng().gen_range(0.8..=1.0)
        } else {
            raw
        };
        Duration::from_millis(ms as u64)
    }

    /// Whether another retry is allowed after `retries` have been made.
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "backoff.initial_delay_ms must be positive".into(),
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be at least 1.0".into(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff.max_delay_ms is below initial_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Connection to the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Glob pattern selecting the keys the bridge mirrors.
    pub key_pattern: String,
    /// Run `CONFIG SET notify-keyspace-events` on connect.
    pub enable_keyspace_events: bool,
    pub op_timeout_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: defaults::REDIS_HOST.to_string(),
            port: defaults::REDIS_PORT,
            db: defaults::REDIS_DB,
            password: None,
            key_pattern: defaults::KEY_PATTERN.to_string(),
            enable_keyspace_events: true,
            op_timeout_ms: defaults::OP_TIMEOUT_MS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// URL safe to log.
    pub fn display_url(&self) -> String {
        match &self.password {
            Some(_) => format!("redis://:***@{}:{}/{}", self.host, self.port, self.db),
            None => self.url(),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Synchronizer behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 0 disables heartbeat staleness.
    pub staleness_window_secs: u64,
    /// Only writes to this key count as producer heartbeats.
    pub heartbeat_key: Option<String>,
    /// How often to probe the store once resync retries are exhausted.
    pub probe_interval_secs: u64,
    pub command_queue_capacity: usize,
    pub contract: ContractVersion,
    /// Origin tag for values whose contract carries none.
    pub default_origin: String,
    /// Origin tag written with dashboard commands.
    pub command_origin: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: defaults::STALENESS_WINDOW_SECS,
            heartbeat_key: None,
            probe_interval_secs: defaults::PROBE_INTERVAL_SECS,
            command_queue_capacity: defaults::COMMAND_QUEUE_CAPACITY,
            contract: ContractVersion::default(),
            default_origin: defaults::DEFAULT_ORIGIN.to_string(),
            command_origin: "spdash".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn staleness_window(&self) -> Option<Duration> {
        (self.staleness_window_secs > 0).then(|| Duration::from_secs(self.staleness_window_secs))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::BIND_HOST.to_string(),
            port: defaults::BIND_PORT,
        }
    }
}

impl ServerConfig {
    /// Accepts IPv4 and IPv6 literals, with or without brackets, and `localhost`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim();
        let ip = match host {
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            _ => host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid bind host '{}'", self.host)))?,
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    /// Variable schema file. No schema means every key is writable.
    pub schema_path: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load with the full precedence chain using the process environment.
    ///
    /// An explicit `path` wins over `SPDASH_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load with a custom environment lookup.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| lookup(env_vars::CONFIG).map(PathBuf::from));
        let mut config = match file {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_from(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup(env_vars::REDIS_HOST) {
            self.store.host = host;
        }
        if let Some(port) = parsed(&lookup, env_vars::REDIS_PORT)? {
            self.store.port = port;
        }
        if let Some(db) = parsed(&lookup, env_vars::REDIS_DB)? {
            self.store.db = db;
        }
        if let Some(pw) = lookup(env_vars::REDIS_PASSWORD).filter(|p| !p.is_empty()) {
            self.store.password = Some(pw);
        }
        if let Some(secs) = parsed(&lookup, env_vars::STALENESS_SECS)? {
            self.sync.staleness_window_secs = secs;
        }
        if let Some(contract) = parsed(&lookup, env_vars::CONTRACT)? {
            self.sync.contract = contract;
        }
        if let Some(key) = lookup(env_vars::HEARTBEAT_KEY).filter(|k| !k.is_empty()) {
            self.sync.heartbeat_key = Some(key);
        }
        if let Some(host) = lookup(env_vars::BIND_HOST) {
            self.server.host = host;
        }
        if let Some(port) = parsed(&lookup, env_vars::BIND_PORT)? {
            self.server.port = port;
        }
        if let Some(schema) = lookup(env_vars::SCHEMA).filter(|s| !s.is_empty()) {
            self.schema_path = Some(PathBuf::from(schema));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.host.trim().is_empty() {
            return Err(ConfigError::Invalid("store.host must not be empty".into()));
        }
        if self.store.key_pattern.is_empty() {
            return Err(ConfigError::Invalid("store.key_pattern must not be empty".into()));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.op_timeout_ms must be positive".into()));
        }
        if self.sync.staleness_window_secs > defaults::MAX_STALENESS_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "sync.staleness_window_secs must be at most {}",
                defaults::MAX_STALENESS_WINDOW_SECS
            )));
        }
        if self.sync.command_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sync.command_queue_capacity must be positive".into(),
            ));
        }
        self.store.backoff.validate()?;
        self.server.bind_addr()?;
        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.store.host, "redis");
        assert_eq!(config.store.port, 6379);
        assert_eq!(config.server.bind_addr().unwrap().port(), 8501);
        assert_eq!(config.sync.staleness_window(), Some(Duration::from_secs(5)));
        assert_eq!(config.store.url(), "redis://redis:6379/0");
    }

    #[test]
    fn test_env_overrides() {
        let config = BridgeConfig::load_with(
            None,
            env(&[
                ("REDIS_HOST", "localhost"),
                ("REDIS_PORT", "6380"),
                ("REDIS_PASSWORD", "secret"),
                ("SPDASH_STALENESS_SECS", "0"),
                ("SPDASH_CONTRACT", "envelope"),
            ]),
        )
        .unwrap();
        assert_eq!(config.store.port, 6380);
        assert_eq!(config.store.url(), "redis://:secret@localhost:6380/0");
        assert_eq!(config.store.display_url(), "redis://:***@localhost:6380/0");
        assert_eq!(config.sync.staleness_window(), None);
        assert_eq!(config.sync.contract, ContractVersion::Envelope);
    }

    #[test]
    fn test_invalid_env() {
        let err = BridgeConfig::load_with(None, env(&[("REDIS_PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = BackoffConfig {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            max_retries: Some(3),
            jitter: false,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(1_000));
        assert!(backoff.allows_retry(2));
        assert!(!backoff.allows_retry(3));

        let jittered = BackoffConfig { jitter: true, ..backoff.clone() };
        let d = jittered.delay_for_attempt(1);
        assert!(d >= Duration::from_millis(160) && d <= Duration::from_millis(200));

        let unbounded = BackoffConfig { max_retries: None, ..backoff };
        assert!(unbounded.allows_retry(u32::MAX - 1));
    }

    #[test]
    fn test_validation() {
        let mut config = BridgeConfig::default();
        config.store.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.host = "not an address".into();
        assert!(config.validate().is_err());

        let err = BridgeConfig::load_with(
            None,
            env(&[("SPDASH_STALENESS_SECS", "18446744073709551615")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bind_addr_hosts() {
        let bind = |host: &str| {
            ServerConfig {
                host: host.to_string(),
                port: 8501,
            }
            .bind_addr()
        };
        assert_eq!(bind("0.0.0.0").unwrap().to_string(), "0.0.0.0:8501");
        assert_eq!(bind("::").unwrap().to_string(), "[::]:8501");
        assert_eq!(bind("[::1]").unwrap().to_string(), "[::1]:8501");
        assert_eq!(bind("localhost").unwrap().to_string(), "127.0.0.1:8501");
        assert!(bind("dashboard.local").is_err());
    }
}
