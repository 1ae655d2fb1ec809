//! PipelineConfig - recognised options, loaded from TOML.
//!
//! ```toml
//! [pipeline]
//! max_concurrency = 4
//! process_interval_ms = 0
//! max_retry = 3
//! retry_delay_ms = 1000
//! max_recheck = 10
//! acquire_timeout_ms = 10000
//!
//! [topics]
//! main = "doc-tasks"
//! retry = "doc-tasks-retry"
//! dead_letter = "doc-tasks-dlq"
//! ```
//!
//! Every field has a default; a missing section means "all defaults".

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Channel, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: ConsumerSettings,
    pub topics: TopicNames,
    pub tracker: TrackerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Consumer / limiter / retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Permits in the process-wide concurrency limiter.
    pub max_concurrency: usize,

    /// Artificial throttle between permit acquisition and processing.
    pub process_interval_ms: u64,

    /// Highest retry count still sent to the retry channel.
    pub max_retry: u32,

    /// Wait before processing a retry-channel delivery.
    pub retry_delay_ms: u64,

    /// Highest `recheck_count` still bounced through the retry channel while
    /// another consumer holds the item. Past it the item is dead-lettered.
    pub max_recheck: u32,

    /// How long to wait for a permit before deferring the delivery.
    pub acquire_timeout_ms: u64,

    /// Listener tasks per consumed channel (main and retry).
    pub listeners_per_channel: usize,

    /// Broker receive timeout per poll.
    pub poll_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            process_interval_ms: 0,
            max_retry: 3,
            retry_delay_ms: 1_000,
            max_recheck: 10,
            acquire_timeout_ms: 10_000,
            listeners_per_channel: 4,
            poll_timeout_ms: 1_000,
        }
    }
}

impl ConsumerSettings {
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry)
    }
}

/// Broker topic per channel. Configured, never hard-coded in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub main: String,
    pub retry: String,
    pub dead_letter: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            main: "tasks".to_string(),
            retry: "tasks-retry".to_string(),
            dead_letter: "tasks-dlq".to_string(),
        }
    }
}

impl TopicNames {
    pub fn for_family(family: &str) -> Self {
        Self {
            main: family.to_string(),
            retry: format!("{family}-retry"),
            dead_letter: format!("{family}-dlq"),
        }
    }

    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Main => &self.main,
            Channel::Retry => &self.retry,
            Channel::DeadLetter => &self.dead_letter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Processing claims older than this are reclaimable; 0 disables expiry.
    pub processing_ttl_ms: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            processing_ttl_ms: 600_000,
        }
    }
}

impl TrackerSettings {
    pub fn processing_ttl(&self) -> Option<Duration> {
        (self.processing_ttl_ms > 0).then(|| Duration::from_millis(self.processing_ttl_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Visibility delay of nacked deliveries (in-memory broker).
    pub redelivery_delay_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            redelivery_delay_ms: 1_000,
        }
    }
}

impl BrokerSettings {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Fail-fast checks run at load time and again by the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.max_concurrency == 0 {
            return Err(ConfigError::Invalid("pipeline.max_concurrency must be >= 1".into()));
        }
        if p.listeners_per_channel == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.listeners_per_channel must be >= 1".into(),
            ));
        }
        if p.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.acquire_timeout_ms must be > 0".into(),
            ));
        }

        let t = &self.topics;
        for (name, value) in [
            ("main", &t.main),
            ("retry", &t.retry),
            ("dead_letter", &t.dead_letter),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("topics.{name} must not be empty")));
            }
        }
        if t.main == t.retry || t.main == t.dead_letter || t.retry == t.dead_letter {
            return Err(ConfigError::Invalid(format!(
                "topic names must be distinct (main={}, retry={}, dead_letter={})",
                t.main, t.retry, t.dead_letter
            )));
        }
        Ok(())
    }
}
