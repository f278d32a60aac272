//! MacroDaemon configuration types and loading

use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::{Backoff, RetryPolicy};

/// Main MacroDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging bus retry and acknowledgement settings
    pub bus: BusConfig,

    /// Duplicate-start guard settings
    pub guard: GuardConfig,

    /// Phase persistence and heartbeat settings
    pub state: StateConfig,

    /// Store locations
    pub storage: StorageConfig,

    /// Worker execution context settings
    pub worker: WorkerConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.guard.dedup_capacity == 0 {
            return Err(eyre::eyre!("guard.dedup-capacity must be greater than zero"));
        }
        if self.state.stale_after_secs < self.state.heartbeat_secs {
            return Err(eyre::eyre!(
                "state.stale-after-secs ({}) must not be shorter than state.heartbeat-secs ({})",
                self.state.stale_after_secs,
                self.state.heartbeat_secs
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .macrodaemon.yml
        let local_config = PathBuf::from(".macrodaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/macrodaemon/macrodaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("macrodaemon").join("macrodaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Messaging bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Retry budget for "no receiver" delivery failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff strategy between retries
    pub backoff: Backoff,

    /// Base backoff interval in milliseconds
    #[serde(rename = "backoff-ms")]
    pub backoff_ms: u64,

    /// How long to wait for a correlated acknowledgement
    #[serde(rename = "ack-timeout-ms")]
    pub ack_timeout_ms: u64,

    /// Channel buffer size for coordinator requests
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear,
            backoff_ms: 250,
            ack_timeout_ms: 15_000,
            channel_buffer: 256,
        }
    }
}

impl BusConfig {
    /// Build the retry policy value handed to the bus
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            backoff_base: Duration::from_millis(self.backoff_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

/// Duplicate-start guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Window within which an identical start is treated as a duplicate
    #[serde(rename = "dedup-window-ms")]
    pub dedup_window_ms: u64,

    /// Capacity threshold that triggers dedup map pruning
    #[serde(rename = "dedup-capacity")]
    pub dedup_capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 1_500,
            dedup_capacity: 256,
        }
    }
}

impl GuardConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Phase persistence and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Heartbeat cadence; the alarm facility is coarse, about a minute
    #[serde(rename = "heartbeat-secs")]
    pub heartbeat_secs: u64,

    /// Age past which a persisted phase counts as abandoned
    #[serde(rename = "stale-after-secs")]
    pub stale_after_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            stale_after_secs: 180,
        }
    }
}

impl StateConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Store locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Preferred session-scoped store (cleared between host restarts)
    #[serde(rename = "session-file")]
    pub session_file: PathBuf,

    /// Durable fallback store
    #[serde(rename = "durable-file")]
    pub durable_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let session_file = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("macrodaemon")
            .join("state.json");
        let durable_file = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".macrodaemon"))
            .join("macrodaemon")
            .join("state.json");

        Self {
            session_file,
            durable_file,
        }
    }
}

/// Worker execution context settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Target name the bus delivers worker envelopes to
    pub target: String,

    /// Channel buffer size for envelopes queued at the worker
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            target: "worker".to_string(),
            channel_buffer: 64,
        }
    }
}
