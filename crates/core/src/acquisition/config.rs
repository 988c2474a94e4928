//! Simulated storefront configuration.

use serde::{Deserialize, Serialize};

/// Timings and success rate of the simulated acquisition and teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Shortest simulated checkout (milliseconds).
    #[serde(default = "default_action_min_ms")]
    pub action_min_ms: u64,

    /// Longest simulated checkout (milliseconds).
    #[serde(default = "default_action_max_ms")]
    pub action_max_ms: u64,

    /// Probability (0.0-1.0) that a simulated checkout succeeds.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    /// Shortest simulated teardown (milliseconds).
    #[serde(default = "default_teardown_min_ms")]
    pub teardown_min_ms: u64,

    /// Longest simulated teardown (milliseconds).
    #[serde(default = "default_teardown_max_ms")]
    pub teardown_max_ms: u64,
}

fn default_action_min_ms() -> u64 {
    2000
}

fn default_action_max_ms() -> u64 {
    4000
}

fn default_success_rate() -> f64 {
    0.7
}

fn default_teardown_min_ms() -> u64 {
    200
}

fn default_teardown_max_ms() -> u64 {
    800
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            action_min_ms: default_action_min_ms(),
            action_max_ms: default_action_max_ms(),
            success_rate: default_success_rate(),
            teardown_min_ms: default_teardown_min_ms(),
            teardown_max_ms: default_teardown_max_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.action_min_ms, 2000);
        assert_eq!(config.action_max_ms, 4000);
        assert_eq!(config.success_rate, 0.7);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SimulationConfig = toml::from_str("success_rate = 1.0").unwrap();
        assert_eq!(config.success_rate, 1.0);
        assert_eq!(config.teardown_max_ms, 800);
    }
}
