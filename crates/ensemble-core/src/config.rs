//! Configuration management for Ensemble
//!
//! Two layers:
//! - [`RunConfig`]: the limits and timings of a single run
//! - [`EnsembleConfig`]: repository-level settings loaded from `.ensemble/config.toml`

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{ConfigError, EnsembleError, Result};

/// Limits and timings for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard ceiling on total rounds
    #[serde(default = "default_round_limit")]
    pub round_limit: usize,

    /// Consecutive non-progress rounds that trigger a reset
    #[serde(default = "default_stall_limit")]
    pub stall_limit: usize,

    /// Resets allowed before the run is exhausted (zero disables resets)
    #[serde(default = "default_reset_limit")]
    pub reset_limit: usize,

    /// Rounds replayed verbatim into prompts; older ones are summarized
    #[serde(default = "default_context_horizon")]
    pub context_horizon: usize,

    /// Deadline for every turn of a round, measured from round start
    #[serde(default = "default_per_round_timeout_secs")]
    pub per_round_timeout_secs: u64,

    /// Pause between rounds
    #[serde(default)]
    pub round_interval_ms: u64,

    /// Longest a subscriber may block a publish before it is dropped
    #[serde(default = "default_subscriber_timeout_ms")]
    pub subscriber_timeout_ms: u64,

    /// Queue depth of each subscription
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Word-set similarity at or above which a response counts as a duplicate
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Participant that writes the final result (internal summary when unset)
    #[serde(default)]
    pub synthesizer: Option<String>,
}

/// Model and endpoint selection for chat workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model to use
    #[serde(default = "default_model")]
    pub default: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Repository-level Ensemble configuration
///
/// Loaded from `.ensemble/config.toml` in the repo root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Side-effecting tool actions need approval before they execute
    #[serde(default = "default_approval_required")]
    pub approval_required: bool,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub models: ModelConfig,
}

// Default value providers
fn default_round_limit() -> usize {
    15
}

fn default_stall_limit() -> usize {
    4
}

fn default_reset_limit() -> usize {
    3
}

fn default_context_horizon() -> usize {
    6
}

fn default_per_round_timeout_secs() -> u64 {
    300
}

fn default_subscriber_timeout_ms() -> u64 {
    2_000
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_similarity_threshold() -> f64 {
    0.9
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_approval_required() -> bool {
    true
}

impl RunConfig {
    pub fn per_round_timeout(&self) -> Duration {
        Duration::from_secs(self.per_round_timeout_secs)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }

    /// Check the numeric limits. Participant-dependent checks happen at planning.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.round_limit == 0 {
            return Err(ConfigError::NonPositiveLimit("round_limit"));
        }
        if self.stall_limit == 0 {
            return Err(ConfigError::NonPositiveLimit("stall_limit"));
        }
        if self.context_horizon == 0 {
            return Err(ConfigError::NonPositiveLimit("context_horizon"));
        }
        if self.per_round_timeout_secs == 0 {
            return Err(ConfigError::NonPositiveLimit("per_round_timeout_secs"));
        }
        if self.subscriber_timeout_ms == 0 {
            return Err(ConfigError::NonPositiveLimit("subscriber_timeout_ms"));
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::NonPositiveLimit("subscriber_buffer"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        Ok(())
    }
}

impl EnsembleConfig {
    /// Load configuration from `.ensemble/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".ensemble/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                EnsembleError::ConfigFile(format!(
                    "Failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.ensemble/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".ensemble");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| EnsembleError::ConfigFile(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            round_limit: default_round_limit(),
            stall_limit: default_stall_limit(),
            reset_limit: default_reset_limit(),
            context_horizon: default_context_horizon(),
            per_round_timeout_secs: default_per_round_timeout_secs(),
            round_interval_ms: 0,
            subscriber_timeout_ms: default_subscriber_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            similarity_threshold: default_similarity_threshold(),
            synthesizer: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            approval_required: default_approval_required(),
            run: RunConfig::default(),
            models: ModelConfig::default(),
        }
    }
}
