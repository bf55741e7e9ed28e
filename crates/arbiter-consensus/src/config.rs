use arbiter_core::{ArbiterError, ArbiterResult};
use serde::{Deserialize, Serialize};

/// Tunables for the decision aggregator.
///
/// All fields have serde defaults so a partial TOML table is valid:
///
/// ```toml
/// high_value_threshold = 5000.0
/// domestic_marker = "AR"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Transaction amounts at or above this band as "high_value".
    pub high_value_threshold: f64,
    /// Transaction amounts below this band as "micro".
    pub micro_threshold: f64,
    /// Context location equal to this marker is domestic; anything else
    /// counts as the "international" expertise area.
    pub domestic_marker: String,
    /// Acceptance window applied to rounds built with [`Self::new_request`].
    pub default_timeout_secs: u64,
    /// Verdict floor for timeout-driven aggregation on such rounds.
    pub default_min_agents: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: 10_000.0,
            micro_threshold: 10.0,
            domestic_marker: "domestic".to_string(),
            default_timeout_secs: 300,
            default_min_agents: 1,
        }
    }
}

impl ConsensusConfig {
    /// Build a round request carrying this config's timeout and verdict
    /// floor, ready for further builder calls.
    pub fn new_request(
        &self,
        id: impl Into<String>,
        required_agents: Vec<String>,
    ) -> crate::types::DecisionRequest {
        crate::types::DecisionRequest::new(id, required_agents)
            .with_timeout(std::time::Duration::from_secs(self.default_timeout_secs))
            .with_min_agents(self.default_min_agents)
    }

    /// Parse a config from a TOML string and validate it.
    pub fn from_toml_str(raw: &str) -> ArbiterResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ArbiterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the amount banding thresholds. The micro band must stay below
    /// the high-value band and both must be non-negative.
    pub fn with_amount_bands(mut self, micro: f64, high_value: f64) -> ArbiterResult<Self> {
        self.micro_threshold = micro;
        self.high_value_threshold = high_value;
        self.validate()?;
        Ok(self)
    }

    /// Set the domestic location marker. Empty markers are rejected.
    pub fn with_domestic_marker(mut self, marker: impl Into<String>) -> ArbiterResult<Self> {
        let marker = marker.into();
        if marker.is_empty() {
            return Err(ArbiterError::Config(
                "domestic_marker must not be empty".into(),
            ));
        }
        self.domestic_marker = marker;
        Ok(self)
    }

    fn validate(&self) -> ArbiterResult<()> {
        if self.micro_threshold < 0.0 || self.high_value_threshold < 0.0 {
            return Err(ArbiterError::Config(
                "amount thresholds must be non-negative".into(),
            ));
        }
        if self.micro_threshold >= self.high_value_threshold {
            return Err(ArbiterError::Config(format!(
                "micro_threshold ({}) must be below high_value_threshold ({})",
                self.micro_threshold, self.high_value_threshold
            )));
        }
        if self.domestic_marker.is_empty() {
            return Err(ArbiterError::Config(
                "domestic_marker must not be empty".into(),
            ));
        }
        if self.default_timeout_secs == 0 {
            return Err(ArbiterError::Config(
                "default_timeout_secs must be positive".into(),
            ));
        }
        if self.default_min_agents == 0 {
            return Err(ArbiterError::Config(
                "default_min_agents must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
