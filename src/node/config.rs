// Node Configuration
// Timing knobs for the counter, discovery and negotiation cadences

use crate::sync::SyncProtocol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Counter increment interval in ms
    pub counter_interval_ms: u64,
    /// Master push / Client poll interval in ms
    pub sync_interval_ms: u64,
    /// Scan duration in seconds
    pub scan_duration_secs: u32,
    /// Rescan when not linked for this long, in ms
    pub rescan_interval_ms: u64,
    /// Abandon a connection attempt after this long, in ms
    pub connection_timeout_ms: u64,
    /// Status report interval in ms
    pub status_interval_ms: u64,
    /// Extra wait before connecting when our identity sorts lower, in ms
    pub collision_delay_ms: u64,
    /// Lower bound of the post-disconnect scan jitter, in ms
    pub backoff_min_ms: u64,
    /// Upper bound of the post-disconnect scan jitter, in ms
    pub backoff_max_ms: u64,
    /// How long an inbound link may stay without a role before it is dropped, in ms
    pub negotiation_window_ms: u64,
    /// Added to the jitter when a half-formed Client relationship is lost, in ms
    pub yield_delay_ms: u64,
    /// Scheduler tick in ms
    pub tick_interval_ms: u64,
    /// Sync payload variant
    pub protocol: SyncProtocol,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            counter_interval_ms: 3_000,
            sync_interval_ms: 10_000,
            scan_duration_secs: 3,
            rescan_interval_ms: 10_000,
            connection_timeout_ms: 10_000,
            status_interval_ms: 20_000,
            collision_delay_ms: 1_000,
            backoff_min_ms: 200,
            backoff_max_ms: 1_200,
            negotiation_window_ms: 5_000,
            yield_delay_ms: 3_000,
            tick_interval_ms: 100,
            protocol: SyncProtocol::Timed,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_counter_interval_ms(mut self, ms: u64) -> Self {
        self.counter_interval_ms = ms;
        self
    }

    pub fn with_sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = ms;
        self
    }

    pub fn with_scan_duration_secs(mut self, secs: u32) -> Self {
        self.scan_duration_secs = secs;
        self
    }

    pub fn with_rescan_interval_ms(mut self, ms: u64) -> Self {
        self.rescan_interval_ms = ms;
        self
    }

    pub fn with_connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = ms;
        self
    }

    pub fn with_status_interval_ms(mut self, ms: u64) -> Self {
        self.status_interval_ms = ms;
        self
    }

    pub fn with_collision_delay_ms(mut self, ms: u64) -> Self {
        self.collision_delay_ms = ms;
        self
    }

    pub fn with_backoff_ms(mut self, min: u64, max: u64) -> Self {
        self.backoff_min_ms = min;
        self.backoff_max_ms = max;
        self
    }

    pub fn with_negotiation_window_ms(mut self, ms: u64) -> Self {
        self.negotiation_window_ms = ms;
        self
    }

    pub fn with_yield_delay_ms(mut self, ms: u64) -> Self {
        self.yield_delay_ms = ms;
        self
    }

    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    pub fn with_protocol(mut self, protocol: SyncProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn counter_interval(&self) -> Duration {
        Duration::from_millis(self.counter_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan_duration_secs))
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn collision_delay(&self) -> Duration {
        Duration::from_millis(self.collision_delay_ms)
    }

    pub fn negotiation_window(&self) -> Duration {
        Duration::from_millis(self.negotiation_window_ms)
    }

    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("counter_interval_ms", self.counter_interval_ms),
            ("sync_interval_ms", self.sync_interval_ms),
            ("rescan_interval_ms", self.rescan_interval_ms),
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("status_interval_ms", self.status_interval_ms),
            ("negotiation_window_ms", self.negotiation_window_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} cannot be 0", name)));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "backoff_min_ms cannot exceed backoff_max_ms".to_string(),
            ));
        }
        if self.collision_delay_ms >= self.connection_timeout_ms {
            return Err(ConfigError::Invalid(
                "collision_delay_ms must be shorter than connection_timeout_ms".to_string(),
            ));
        }
        Ok(())
    }
}
