//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between two monitoring cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Monitor configuration file (sites, policy, directory)
    #[serde(default)]
    pub config: Option<PathBuf>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    3600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            interval_secs: default_interval(),
            config: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from `FEDMON_AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("FEDMON_AGENT").try_parsing(true))
            .build()?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.interval(), Duration::from_secs(3600));
        assert!(config.config.is_none());
    }

    #[test]
    fn test_zero_interval_clamped() {
        let config = AgentConfig {
            interval_secs: 0,
            ..AgentConfig::default()
        };
        assert_eq!(config.interval(), Duration::from_secs(1));
    }
}
