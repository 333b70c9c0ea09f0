//! Configuration loading and typed config structures for Weatherflow.
//!
//! The canonical configuration lives in `weatherflow-config.yaml` at the
//! project root. Every section and field has a default, so an empty or
//! missing file gives a working consumer pointed at a local NATS server.
//!
//! Deployment-specific values can be overridden from the environment:
//!
//! | Variable                    | Overrides                               |
//! |-----------------------------|-----------------------------------------|
//! | `NATS_URL`                  | `transport.nats_url`                    |
//! | `WEATHER_TOPIC`             | `transport.topic`                       |
//! | `WEATHER_CONSUMER_GROUP_ID` | `transport.consumer_group`              |
//! | `WEATHERFLOW_REPLAY_PATH`   | `ingest.replay_path` (and mode `replay`)|
//! | `OBSERVER_PORT`             | `observer.port`                         |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::backoff::BackoffConfig;
use crate::parse::FieldMapping;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level consumer configuration.
///
/// Mirrors the structure of `weatherflow-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WeatherflowConfig {
    /// Message transport (NATS) settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Where events come from and how reconnects back off.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Snapshot render cadence.
    #[serde(default)]
    pub render: RenderConfig,

    /// HTTP observer settings.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Accepted field names for incoming records.
    #[serde(default)]
    pub parser: FieldMapping,

    /// Log level and output format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WeatherflowConfig {
    /// Load configuration from `path`, or use the defaults if the file does
    /// not exist. Environment overrides are applied and the result is
    /// validated.
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        warn!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string. The environment
    /// is not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from process environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override values using `lookup` in place of the process environment.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("NATS_URL") {
            self.transport.nats_url = val;
        }
        if let Some(val) = lookup("WEATHER_TOPIC") {
            self.transport.topic = val;
        }
        if let Some(val) = lookup("WEATHER_CONSUMER_GROUP_ID") {
            self.transport.consumer_group = val;
        }
        if let Some(val) = lookup("WEATHERFLOW_REPLAY_PATH") {
            self.ingest.replay_path = Some(PathBuf::from(val));
            self.ingest.mode = IngestMode::Replay;
        }
        if let Some(val) = lookup("OBSERVER_PORT") {
            match val.parse() {
                Ok(port) => self.observer.port = port,
                Err(_) => warn!(value = %val, "ignoring unparseable OBSERVER_PORT"),
            }
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.render.interval_ms == 0 {
            return invalid("render.interval_ms must be greater than zero");
        }
        if self.ingest.replay_interval_ms == 0 {
            return invalid("ingest.replay_interval_ms must be greater than zero");
        }
        if self.ingest.backoff_initial_ms == 0 {
            return invalid("ingest.backoff_initial_ms must be greater than zero");
        }
        if self.ingest.backoff_max_ms < self.ingest.backoff_initial_ms {
            return invalid("ingest.backoff_max_ms must not be below backoff_initial_ms");
        }
        if let Some(alias) = self
            .parser
            .pressure
            .iter()
            .chain(&self.parser.windspeed)
            .find(|alias| !alias.scale.is_normal())
        {
            return Err(ConfigError::Invalid(format!(
                "parser alias {} has unusable scale {}",
                alias.key, alias.scale
            )));
        }
        match self.ingest.mode {
            IngestMode::Replay if self.ingest.replay_path.is_none() => {
                invalid("ingest.mode is replay but ingest.replay_path is not set")
            }
            IngestMode::Nats if self.transport.topic.trim().is_empty() => {
                invalid("transport.topic must not be empty")
            }
            _ => Ok(()),
        }
    }

    /// Reconnect backoff settings for the ingest loop.
    pub const fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.ingest.backoff_initial_ms),
            max: Duration::from_millis(self.ingest.backoff_max_ms),
            max_retries: self.ingest.max_retries,
        }
    }

    /// Interval between snapshot renders.
    pub const fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render.interval_ms)
    }

    /// Interval between replayed records.
    pub const fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.ingest.replay_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// NATS transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject carrying weather observations.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Queue group; consumers in one group share the stream.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
        }
    }
}

/// Where the ingest loop reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Subscribe to the NATS subject.
    #[default]
    Nats,
    /// Replay a JSON-lines file.
    Replay,
}

/// Ingest settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    /// Event source.
    #[serde(default)]
    pub mode: IngestMode,

    /// JSON-lines file for replay mode.
    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Delay between replayed records.
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,

    /// First reconnect delay.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Reconnect delay ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Reconnect attempts per outage. 0 retries forever.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::default(),
            replay_path: None,
            replay_interval_ms: default_replay_interval_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: 0,
        }
    }
}

/// Render loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderConfig {
    /// Snapshot cadence.
    #[serde(default = "default_render_interval_ms")]
    pub interval_ms: u64,

    /// Log each rendered snapshot as a table.
    #[serde(default = "default_true")]
    pub log_table: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_render_interval_ms(),
            log_table: true,
        }
    }
}

/// Observer HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Whether to start the observer.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_nats_url() -> String {
    String::from("nats://localhost:4222")
}

fn default_topic() -> String {
    String::from("weather.observations")
}

fn default_consumer_group() -> String {
    String::from("weatherflow")
}

const fn default_replay_interval_ms() -> u64 {
    1000
}

const fn default_backoff_initial_ms() -> u64 {
    500
}

const fn default_backoff_max_ms() -> u64 {
    30_000
}

const fn default_render_interval_ms() -> u64 {
    2000
}

const fn default_true() -> bool {
    true
}

fn default_observer_host() -> String {
    String::from("0.0.0.0")
}

const fn default_observer_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    String::from("info")
}
