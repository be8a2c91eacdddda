use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the pollstream runner.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Query backend connection configuration.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Template variables substituted into query payloads at startup.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Streaming subscriptions, one per active query.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Query backend connection configuration.
#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    /// Query backend HTTP endpoint (e.g., "http://localhost:3000/query").
    #[serde(default)]
    pub url: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// How a subscription's buffer is shaped between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamingDataType {
    /// Append one row per tick into a bounded time-series buffer.
    TimeSeries,
    /// Replace the displayed table wholesale each tick.
    Table,
}

impl Default for StreamingDataType {
    fn default() -> Self {
        Self::TimeSeries
    }
}

impl StreamingDataType {
    /// Returns the canonical label used in configuration and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSeries => "time-series",
            Self::Table => "table",
        }
    }
}

/// One active streaming query configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Identifies this subscription within a request batch.
    pub id: String,

    /// Query payload handed to the execution backend.
    pub query: String,

    /// Re-execute the query on a cadence instead of once. Default: false.
    #[serde(default)]
    pub streaming: bool,

    /// Execution cadence. Default: 1s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum buffered rows. Default: 1000.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Aggregation mode. Default: time-series.
    #[serde(default)]
    pub data_type: StreamingDataType,
}

impl Subscription {
    /// Creates a streaming time-series subscription with default cadence and
    /// capacity.
    pub fn streaming(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            streaming: true,
            interval: default_interval(),
            capacity: default_capacity(),
            data_type: StreamingDataType::default(),
        }
    }

    /// Creates a one-shot subscription.
    pub fn one_shot(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            streaming: false,
            ..Self::streaming(id, query)
        }
    }

    /// Validate this subscription's parameters. Invalid values fail fast
    /// here, never silently clamped.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("subscription id must not be empty");
        }

        if self.query.is_empty() {
            bail!("subscription {} has an empty query", self.id);
        }

        if self.capacity == 0 {
            bail!("subscription {} capacity must be > 0", self.id);
        }

        if self.interval.is_zero() {
            bail!("subscription {} interval must be > 0", self.id);
        }

        Ok(())
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(crate) fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

pub(crate) fn default_capacity() -> usize {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            endpoint: EndpointConfig::default(),
            variables: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: default_request_timeout(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.url.is_empty() {
            bail!("endpoint.url is required");
        }

        if self.endpoint.timeout.is_zero() {
            bail!("endpoint.timeout must be > 0");
        }

        if self.subscriptions.is_empty() {
            bail!("at least one subscription is required");
        }

        let mut seen = HashSet::new();
        for sub in &self.subscriptions {
            sub.validate()?;

            if !seen.insert(sub.id.as_str()) {
                bail!("duplicate subscription id: {}", sub.id);
            }
        }

        Ok(())
    }
}
