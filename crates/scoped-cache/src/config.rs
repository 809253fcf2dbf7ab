use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Controls the log subscriber installed by [`init_logging`](crate::logging::init_logging).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// An `EnvFilter` directive, like `info` or `scoped_cache=trace`.
    pub level: String,
    /// The log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: "info".to_owned(),
            format: LogFormat::Pretty,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "scoped_cache".to_owned(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings of a single [`ScopedCache`](crate::ScopedCache).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// The name used to tag metrics and log messages.
    pub name: String,

    /// Maximum number of entries kept in memory.
    pub capacity: usize,

    /// How long a successfully computed value stays valid.
    ///
    /// `None` keeps values until they are evicted or invalidated.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Option<Duration>,

    /// How long a failed lookup is replayed before it is recomputed.
    ///
    /// Defaults to [`time_to_live`](Self::time_to_live).
    #[serde(with = "humantime_serde")]
    pub failure_time_to_live: Option<Duration>,
}

impl CacheConfig {
    /// The time-to-live for the given lookup result.
    ///
    /// `None` means the result never expires.
    pub fn time_to_live_for<V, E>(&self, result: &Result<V, E>) -> Option<Duration> {
        match result {
            Ok(_) => self.time_to_live,
            Err(_) => self.failure_time_to_live.or(self.time_to_live),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            name: "default".to_owned(),
            capacity: 1024,
            time_to_live: None,
            failure_time_to_live: None,
        }
    }
}

/// Top-level configuration, as read from a YAML file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: Logging,
    /// Metrics settings.
    pub metrics: Metrics,
    /// The cache itself.
    pub cache: CacheConfig,
}

impl Config {
    /// Reads the configuration from the given path, or returns the defaults if there is none.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}
