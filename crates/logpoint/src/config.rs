// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_PERIOD_SECS, DEFAULT_INFLUX_PORT, DEFAULT_QUEUE_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::errors::ConfigError;
use crate::flusher::RetryStrategy;
use crate::influx::Precision;
use crate::translate::{FilterSpec, NoMatchPolicy, TranslationSpec};
use crate::util::parse_tags;

/// Sizing of the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub queue_size: usize,
    pub flush_period: Duration,
    pub retry_strategy: RetryStrategy,
}

impl PipelineConfig {
    /// Non-positive values fall back to the defaults.
    #[must_use]
    pub fn new(batch_size: i64, queue_size: i64, flush_period_secs: i64) -> Self {
        PipelineConfig {
            batch_size: positive_or(batch_size, DEFAULT_BATCH_SIZE),
            queue_size: positive_or(queue_size, DEFAULT_QUEUE_SIZE),
            flush_period: Duration::from_secs(
                u64::try_from(flush_period_secs)
                    .ok()
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_FLUSH_PERIOD_SECS),
            ),
            retry_strategy: RetryStrategy::default(),
        }
    }

    /// Replaces zero sizes and a zero flush period with the defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        PipelineConfig {
            batch_size: if self.batch_size == 0 {
                defaults.batch_size
            } else {
                self.batch_size
            },
            queue_size: if self.queue_size == 0 {
                defaults.queue_size
            } else {
                self.queue_size
            },
            flush_period: if self.flush_period.is_zero() {
                defaults.flush_period
            } else {
                self.flush_period
            },
            retry_strategy: self.retry_strategy,
        }
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

fn positive_or(value: i64, default: usize) -> usize {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Connection settings for InfluxDB.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InfluxConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub retention_policy: Option<String>,
    #[serde(default)]
    pub precision: Precision,
    /// Per-request timeout, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        InfluxConfig {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            database: String::new(),
            retention_policy: None,
            precision: Precision::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_INFLUX_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Everything one pipeline instance needs, usually read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub influx: InfluxConfig,
    pub translation: TranslationSpec,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Tags added to every point
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Extra grok pattern definitions
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub batch_size: i64,
    #[serde(default)]
    pub queue_size: i64,
    #[serde(default)]
    pub flush_period_secs: i64,
    #[serde(default)]
    pub retry: RetryStrategy,
    #[serde(default)]
    pub no_match: NoMatchPolicy,
    /// Log every captured record before it is processed
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(contents)?;
        Ok(config)
    }

    /// Overrides file values with `LOGPOINT_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("LOGPOINT_INFLUX_HOST") {
            self.influx.host = host;
        }
        if let Ok(port) = env::var("LOGPOINT_INFLUX_PORT") {
            self.influx.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LOGPOINT_INFLUX_PORT",
                value: port.clone(),
            })?;
        }
        if let Ok(username) = env::var("LOGPOINT_INFLUX_USERNAME") {
            self.influx.username = Some(username);
        }
        if let Ok(password) = env::var("LOGPOINT_INFLUX_PASSWORD") {
            self.influx.password = Some(password);
        }
        if let Ok(database) = env::var("LOGPOINT_INFLUX_DATABASE") {
            self.influx.database = database;
        }
        if let Ok(tags) = env::var("LOGPOINT_TAGS") {
            self.tags.extend(parse_tags(&tags));
        }
        if let Ok(debug) = env::var("LOGPOINT_DEBUG") {
            self.debug = debug.to_lowercase() == "true";
        }
        Ok(())
    }

    /// Checks the values the pipeline cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.influx.database.is_empty() {
            return Err(ConfigError::Missing("influx.database"));
        }
        if self.translation.pattern.is_empty() {
            return Err(ConfigError::Missing("translation.pattern"));
        }
        if self.translation.key.is_empty() {
            return Err(ConfigError::Missing("translation.key"));
        }
        Ok(())
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig::new(self.batch_size, self.queue_size, self.flush_period_secs)
            .with_retry_strategy(self.retry)
    }
}
