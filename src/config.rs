//! Configuration
//!
//! Every tunable the core exposes, with the documented defaults. Loadable
//! from YAML; unset keys fall back to their defaults, so a partial config
//! file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between LLM calls (process-wide leaky bucket)
    pub rate_limit_delay: f64,
    pub llm_model: String,
    pub embedding_model: String,
    /// Default topN for hybrid retrieval
    pub top_n_default: usize,
    /// Fusion weights: graph, concept, expansion, hippo
    pub hybrid_weights: [f32; 4],
    pub session_timeout_s: u64,
    pub part_timeout_s: u64,
    pub llm_timeout_s: u64,
    /// Max attempts for transient LLM/store errors
    pub max_retries: u32,
    /// External graph engine connection (unused by the embedded SQLite store)
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    /// Database name for the external engine, or the SQLite file path
    pub graph_database: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit_delay: 2.0,
            llm_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            top_n_default: 15,
            hybrid_weights: [0.3, 0.25, 0.15, 0.3],
            session_timeout_s: 1800,
            part_timeout_s: 300,
            llm_timeout_s: 60,
            max_retries: 5,
            graph_uri: String::new(),
            graph_user: String::new(),
            graph_password: String::new(),
            graph_database: String::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_delay < 0.0 {
            return Err(ConfigError::Invalid(
                "rate_limit_delay must be non-negative".to_string(),
            ));
        }
        if self.top_n_default == 0 {
            return Err(ConfigError::Invalid(
                "top_n_default must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be positive".to_string(),
            ));
        }
        if self.hybrid_weights.iter().any(|w| *w < 0.0) {
            return Err(ConfigError::Invalid(
                "hybrid_weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.rate_limit_delay, 2.0);
        assert_eq!(config.top_n_default, 15);
        assert_eq!(config.hybrid_weights, [0.3, 0.25, 0.15, 0.3]);
        assert_eq!(config.session_timeout_s, 1800);
        assert_eq!(config.part_timeout_s, 300);
        assert_eq!(config.llm_timeout_s, 60);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml("llm_model: deepseek-chat\nrate_limit_delay: 0.5\n").unwrap();
        assert_eq!(config.llm_model, "deepseek-chat");
        assert_eq!(config.rate_limit_delay, 0.5);
        assert_eq!(config.top_n_default, 15);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_yaml("rate_limit_delay: -1.0").is_err());
        assert!(Config::from_yaml("top_n_default: 0").is_err());
        assert!(Config::from_yaml("hybrid_weights: [0.3, -0.1, 0.2, 0.3]").is_err());
    }
}
