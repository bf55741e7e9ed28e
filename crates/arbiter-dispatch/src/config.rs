use arbiter_core::{ArbiterError, ArbiterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the workload distributor.
///
/// All fields have serde defaults so a partial TOML table is valid:
///
/// ```toml
/// queue_capacity = 500
/// heartbeat_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of pending tasks before submissions are rejected.
    pub queue_capacity: usize,
    /// Period of the monitoring loop.
    pub monitor_interval_secs: u64,
    /// Heartbeat silence after which an agent is marked offline.
    pub heartbeat_timeout_secs: u64,
    /// Pool utilization above which a scale-up signal is emitted.
    pub scale_up_threshold: f64,
    /// Pool utilization below which a scale-down signal is emitted.
    pub scale_down_threshold: f64,
    /// Age after which completed assignments are purged.
    pub completed_retention_secs: u64,
    /// Pause after a routing attempt finds no eligible agent.
    pub routing_backoff_ms: u64,
    /// Window for the rolling average assignment time.
    pub rolling_window_secs: u64,
    /// Bound on how long `stop()` waits for the loops to drain.
    pub stop_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            monitor_interval_secs: 10,
            heartbeat_timeout_secs: 60,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            completed_retention_secs: 24 * 60 * 60,
            routing_backoff_ms: 500,
            rolling_window_secs: 300,
            stop_timeout_secs: 5,
        }
    }
}

impl DispatchConfig {
    /// Parse a config from a TOML string and validate it.
    pub fn from_toml_str(raw: &str) -> ArbiterResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ArbiterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the queue capacity. Zero is rejected.
    pub fn with_queue_capacity(mut self, capacity: usize) -> ArbiterResult<Self> {
        if capacity == 0 {
            return Err(ArbiterError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        self.queue_capacity = capacity;
        Ok(self)
    }

    /// Set the heartbeat timeout. Zero is rejected.
    pub fn with_heartbeat_timeout_secs(mut self, secs: u64) -> ArbiterResult<Self> {
        if secs == 0 {
            return Err(ArbiterError::Config(
                "heartbeat_timeout_secs must be at least 1".into(),
            ));
        }
        self.heartbeat_timeout_secs = secs;
        Ok(self)
    }

    /// Set both scaling thresholds. Each must be in (0, 1] and the
    /// scale-down threshold must stay below the scale-up threshold.
    pub fn with_scale_thresholds(mut self, up: f64, down: f64) -> ArbiterResult<Self> {
        self.scale_up_threshold = up;
        self.scale_down_threshold = down;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> ArbiterResult<()> {
        if self.queue_capacity == 0 {
            return Err(ArbiterError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ArbiterError::Config(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ArbiterError::Config(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        Ok(())
    }

    /// Monitoring loop period as a [`Duration`].
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Routing backoff as a [`Duration`].
    pub fn routing_backoff(&self) -> Duration {
        Duration::from_millis(self.routing_backoff_ms)
    }

    /// Stop drain bound as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.max(1))
    }
}
