//! Configuration types for the Contentflow engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Completion service configuration
    pub completion: CompletionSettings,

    /// Number of content ideas requested from the content-direction stage
    pub ideas_per_run: usize,

    /// When true, structured stages fail on malformed completion output
    /// instead of substituting a fallback record
    pub strict_parsing: bool,

    /// Optional overall deadline per workflow run, checked at stage
    /// boundaries (a stage in flight always runs to completion)
    #[serde(default, with = "humantime_serde::option")]
    pub run_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion: CompletionSettings::default(),
            ideas_per_run: 3,
            strict_parsing: false,
            run_deadline: None,
        }
    }
}

/// Completion provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    OpenAI,
    /// Placeholder provider that rejects every call; forces callers to
    /// wire a real client
    Stub,
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    /// Provider type
    pub provider: CompletionProvider,

    /// Model name
    pub model: String,

    /// API key (prefer env vars over config files)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for OpenAI-compatible endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bound on a single completion call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: usize,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::Stub,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(60),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (contentflow.toml or path from CONTENTFLOW_CONFIG_PATH)
    /// 3. `CONTENTFLOW_`-prefixed environment variable overrides
    ///    (nested keys split on `__`, e.g. `CONTENTFLOW_COMPLETION__MODEL`)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("contentflow.toml"));

        if let Ok(path) = std::env::var("CONTENTFLOW_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: EngineConfig = figment
            .merge(Env::prefixed("CONTENTFLOW_").split("__"))
            .extract()
            .map_err(|e| {
                crate::error::EngineError::Configuration(format!(
                    "Failed to load configuration: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                crate::error::EngineError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> crate::error::Result<()> {
        if self.ideas_per_run == 0 {
            return Err(crate::error::EngineError::Configuration(
                "ideas_per_run must be at least 1".to_string(),
            ));
        }
        if self.completion.model.is_empty() {
            return Err(crate::error::EngineError::Configuration(
                "completion.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
