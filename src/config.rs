// src/config.rs - Alerting pipeline configuration

use crate::error::{AlertError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Alerting pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Debounce stage
    #[serde(default)]
    pub filter: FilterConfig,

    /// Per-subscriber batching
    #[serde(default)]
    pub batcher: BatcherConfig,

    /// Stage channel sizing
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Alarm history retention
    #[serde(default)]
    pub history: HistoryConfig,

    /// Subscription persistence
    #[serde(default)]
    pub store: StoreConfig,
}

impl AlertConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AlertConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.capacity == 0 {
            return Err(AlertError::Config("channels.capacity must be > 0".into()));
        }
        if self.history.retention_hours > 0 && self.history.prune_interval_secs == 0 {
            return Err(AlertError::Config(
                "history.prune_interval_secs must be > 0 when pruning is enabled".into(),
            ));
        }
        if let Some(path) = &self.store.path {
            if path.as_os_str().is_empty() {
                return Err(AlertError::Config("store.path is empty".into()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// STAGE CONFIGURATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// How long an alarm must stay on before it is notified
    #[serde(default = "default_minimum_on_ms")]
    pub minimum_on_ms: u64,
}

impl FilterConfig {
    pub fn minimum_on(&self) -> Duration {
        Duration::from_millis(self.minimum_on_ms)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            minimum_on_ms: default_minimum_on_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Trailing window after a leading notification; 0 disables batching
    #[serde(default = "default_batch_period_ms")]
    pub batch_period_ms: u64,
}

impl BatcherConfig {
    pub fn batch_period(&self) -> Duration {
        Duration::from_millis(self.batch_period_ms)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_period_ms: default_batch_period_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Closed alarm intervals older than this are pruned; 0 keeps everything
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl HistoryConfig {
    pub fn retention(&self) -> Option<chrono::Duration> {
        if self.retention_hours == 0 {
            return None;
        }
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding push subscriptions; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_minimum_on_ms() -> u64 { 120_000 }
fn default_batch_period_ms() -> u64 { 60_000 }
fn default_capacity() -> usize { 64 }
fn default_retention_hours() -> u64 { 720 }
fn default_prune_interval_secs() -> u64 { 3600 }
