// src/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool and batching behavior
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// CDX submission settings
    #[serde(default)]
    pub submit: SubmitConfig,

    /// Rule source settings
    #[serde(default)]
    pub rules: RulesConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.indexer.batch_size == 0 {
            return Err(AppError::validation("indexer.batch_size must be > 0"));
        }
        if self.submit.user_agent.trim().is_empty() {
            return Err(AppError::validation("submit.user_agent is empty"));
        }
        if self.submit.timeout_secs == 0 {
            return Err(AppError::validation("submit.timeout_secs must be > 0"));
        }
        if self.rules.timeout_secs == 0 {
            return Err(AppError::validation("rules.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Worker pool and batch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Worker pool size; 0 means available parallelism
    #[serde(default)]
    pub workers: usize,

    /// Pending files fetched per batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
}

impl IndexerConfig {
    /// The configured worker count, resolving 0 to available parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: defaults::batch_size(),
        }
    }
}

/// CDX submission settings.
///
/// The timeout bounds a whole bulk submission and must stay generous:
/// submissions can carry every record of a large container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Submission timeout in seconds
    #[serde(default = "defaults::submit_timeout")]
    pub timeout_secs: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::submit_timeout(),
        }
    }
}

/// Rule source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Base URL of the rule source (empty disables refresh)
    #[serde(default)]
    pub source_url: String,

    /// Rule source request timeout in seconds
    #[serde(default = "defaults::rules_timeout")]
    pub timeout_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            timeout_secs: defaults::rules_timeout(),
        }
    }
}

mod defaults {
    pub fn batch_size() -> usize {
        100
    }

    pub fn user_agent() -> String {
        "bamboo-cdx/0.1".to_string()
    }

    pub fn submit_timeout() -> u64 {
        600
    }

    pub fn rules_timeout() -> u64 {
        60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.indexer.effective_workers() >= 1);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [indexer]
            workers = 4

            [rules]
            source_url = "http://rules.example.org"
            "#,
        )
        .unwrap();
        assert_eq!(config.indexer.workers, 4);
        assert_eq!(config.indexer.batch_size, 100);
        assert_eq!(config.submit.timeout_secs, 600);
        assert_eq!(config.rules.source_url, "http://rules.example.org");
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let mut config = Config::default();
        config.indexer.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
