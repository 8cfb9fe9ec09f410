//! Tracker configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes. Durations are stored as milliseconds to keep the JSON flat.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Environment variable that overrides `data_dir`.
pub const DATA_DIR_ENV: &str = "RUNTRACK_DATA_DIR";

/// Requested fix quality from the platform location provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationAccuracy {
    High,
    Balanced,
    Low,
}

/// Position subscription policy handed to the location source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationPolicy {
    /// Target time between fixes.
    pub interval_ms: u64,
    /// The provider may deliver faster than `interval_ms`, but never faster than this.
    pub min_interval_ms: u64,
    pub accuracy: LocationAccuracy,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            min_interval_ms: 1000,
            accuracy: LocationAccuracy::High,
        }
    }
}

impl LocationPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(self.min_interval_ms).max(1))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Heart-rate sensor connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    /// Address used when `Start` does not name a sensor.
    pub sensor_address: Option<String>,
    /// How long a real central scans for the sensor before giving up.
    pub scan_timeout_ms: u64,
    /// Upper bound on connect + discovery + subscribe.
    pub connect_timeout_ms: u64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            sensor_address: None,
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
        }
    }
}

impl HeartRateConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Top-level configuration for a tracker process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory holding one `run_<id>.csv` per finished run.
    pub data_dir: PathBuf,
    pub location: LocationPolicy,
    pub heart_rate: HeartRateConfig,
    /// Elapsed-time tick period.
    pub tick_interval_ms: u64,
    /// Capacity of the controller's command queue.
    pub command_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            location: LocationPolicy::default(),
            heart_rate: HeartRateConfig::default(),
            tick_interval_ms: 1000,
            command_buffer: 32,
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let data = std::fs::read(path)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: TrackerConfig = serde_json::from_slice(&data)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config.with_env_overrides())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
        .join(".runtrack")
        .join("runs")
}
