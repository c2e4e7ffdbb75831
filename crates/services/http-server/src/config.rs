//! Configuration for the Chordstream server
//!
//! Configuration can be loaded from a TOML file; `CHORDSTREAM_*`
//! environment variables override individual fields.

use chordstream_core::buffer::BufferConfig;
use chordstream_core::collaborators::DEFAULT_SAMPLE_RATE;
use chordstream_core::protocol::PayloadEncoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the Chordstream server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Streaming session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Adaptive buffer tunables
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Blocking worker pool
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Audio decoding
    #[serde(default)]
    pub audio: AudioConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Streaming session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds between pings
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Outbound messages queued per session before senders wait
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// How text frame `data` strings become bytes (`utf8` or `base64`)
    #[serde(default)]
    pub payload_encoding: PayloadEncoding,

    /// Expose delivered messages at `/sessions/events`
    #[serde(default = "default_events_enabled")]
    pub events_enabled: bool,

    /// Events buffered per `/sessions/events` subscriber
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_events_enabled() -> bool {
    true
}

fn default_events_capacity() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            outbound_capacity: default_outbound_capacity(),
            payload_encoding: PayloadEncoding::default(),
            events_enabled: default_events_enabled(),
            events_capacity: default_events_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Which store backs the result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sqlite,
    Disabled,
}

impl std::str::FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Entry lifetime in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Database file for the `sqlite` backend
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Seconds between expired-entry sweeps (0 disables)
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("chordstream-cache.db")
}

fn default_key_prefix() -> String {
    "chords:".to_string()
}

fn default_purge_interval_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            ttl_secs: default_ttl_secs(),
            sqlite_path: default_sqlite_path(),
            key_prefix: default_key_prefix(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

/// Blocking worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent collaborator calls across all sessions and requests
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Audio decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate assumed for headerless PCM
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info,tower_http=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load the file if it exists, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.as_ref().exists() => Self::from_file(p)?,
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CHORDSTREAM_*` variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("CHORDSTREAM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CHORDSTREAM_PORT") {
            self.server.port = parse("CHORDSTREAM_PORT", &port)?;
        }

        // Session
        if let Some(secs) = lookup("CHORDSTREAM_HEARTBEAT_SECS") {
            self.session.heartbeat_secs = parse("CHORDSTREAM_HEARTBEAT_SECS", &secs)?;
        }
        if let Some(encoding) = lookup("CHORDSTREAM_PAYLOAD_ENCODING") {
            self.session.payload_encoding = match encoding.to_ascii_lowercase().as_str() {
                "utf8" => PayloadEncoding::Utf8,
                "base64" => PayloadEncoding::Base64,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "CHORDSTREAM_PAYLOAD_ENCODING: unknown encoding '{}'",
                        encoding
                    )))
                }
            };
        }

        // Cache
        if let Some(backend) = lookup("CHORDSTREAM_CACHE_BACKEND") {
            self.cache.backend = parse("CHORDSTREAM_CACHE_BACKEND", &backend)?;
        }
        if let Some(ttl) = lookup("CHORDSTREAM_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse("CHORDSTREAM_CACHE_TTL_SECS", &ttl)?;
        }
        if let Some(path) = lookup("CHORDSTREAM_CACHE_SQLITE_PATH") {
            self.cache.sqlite_path = PathBuf::from(path);
        }
        if let Some(prefix) = lookup("CHORDSTREAM_CACHE_KEY_PREFIX") {
            self.cache.key_prefix = prefix;
        }

        // Workers
        if let Some(max) = lookup("CHORDSTREAM_MAX_CONCURRENCY") {
            self.workers.max_concurrency = parse("CHORDSTREAM_MAX_CONCURRENCY", &max)?;
        }

        // Logging
        if let Some(format) = lookup("CHORDSTREAM_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "CHORDSTREAM_LOG_FORMAT: unknown format '{}'",
                        format
                    )))
                }
            };
        }

        Ok(())
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.min_window == 0 || self.buffer.min_window > self.buffer.max_window {
            return Err(ConfigError::Invalid(format!(
                "buffer: need 0 < min_window <= max_window (got {} and {})",
                self.buffer.min_window, self.buffer.max_window
            )));
        }
        if self.buffer.capacity < self.buffer.max_window {
            return Err(ConfigError::Invalid(format!(
                "buffer: capacity {} is smaller than max_window {}",
                self.buffer.capacity, self.buffer.max_window
            )));
        }
        if !(0.0..=1.0).contains(&self.buffer.smoothing) {
            return Err(ConfigError::Invalid(format!(
                "buffer: smoothing {} is outside 0.0 - 1.0",
                self.buffer.smoothing
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio: sample_rate must be positive".into()));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", key, e)))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.heartbeat_secs, 10);
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.key_prefix, "chords:");
        assert!(config.workers.max_concurrency >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
[server]
port = 9090

[session]
heartbeat_secs = 5
payload_encoding = "base64"

[buffer]
min_window = 1024
max_window = 8192

[cache]
backend = "sqlite"
sqlite_path = "/tmp/chords.db"

[logging]
format = "json"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.session.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.session.payload_encoding, PayloadEncoding::Base64);
        assert_eq!(config.buffer.min_window, 1024);
        assert_eq!(config.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(config.cache.sqlite_path, PathBuf::from("/tmp/chords.db"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHORDSTREAM_PORT", "7000"),
            ("CHORDSTREAM_CACHE_BACKEND", "disabled"),
            ("CHORDSTREAM_PAYLOAD_ENCODING", "BASE64"),
            ("CHORDSTREAM_MAX_CONCURRENCY", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.cache.backend, CacheBackendKind::Disabled);
        assert_eq!(config.session.payload_encoding, PayloadEncoding::Base64);
        assert_eq!(config.workers.max_concurrency, 3);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "CHORDSTREAM_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHORDSTREAM_PORT"));
    }

    #[test]
    fn test_load_file_and_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[buffer]\nmin_window = 9000\nmax_window = 100").unwrap();

        let err = Config::from_file(file.path()).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let missing = Config::load(Some("/no/such/chordstream.toml"));
        assert!(missing.is_ok());
    }
}
