//! Configuration Models
//!
//! Application configuration loaded from a TOML file. Every field has a
//! default so a partial (or missing) file still yields a runnable service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use autoprovider_llm::ModelConfig;

use crate::utils::error::{AppError, AppResult};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "AUTOPROVIDER_CONFIG";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub push: PushConfig,
    /// System prompt template with `${...}` placeholders
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Agent work loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Models in priority order
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Model used for history summaries (first agent model when unset)
    #[serde(default)]
    pub summarizer: Option<ModelConfig>,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_work_timeout_secs")]
    pub work_timeout_secs: u64,
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_marker_tag")]
    pub marker_tag: String,
    #[serde(default = "default_path_root")]
    pub path_root: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            summarizer: None,
            call_timeout_secs: default_call_timeout_secs(),
            work_timeout_secs: default_work_timeout_secs(),
            loop_delay_ms: default_loop_delay_ms(),
            max_rounds: default_max_rounds(),
            marker_tag: default_marker_tag(),
            path_root: default_path_root(),
        }
    }
}

impl AgentConfig {
    /// Configured models with base URL, model and key present.
    pub fn usable_models(&self) -> Vec<ModelConfig> {
        self.models
            .iter()
            .filter(|m| m.is_usable())
            .cloned()
            .collect()
    }

    /// Summarizer model, falling back to the first usable agent model.
    pub fn summarizer_model(&self) -> Option<ModelConfig> {
        self.summarizer
            .clone()
            .filter(|m| m.is_usable())
            .or_else(|| self.usable_models().into_iter().next())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn work_timeout(&self) -> Duration {
        Duration::from_secs(self.work_timeout_secs)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

/// Context assembly and compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Extra tokens held back on top of the preamble
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: u32,
    /// Fraction of the history budget that triggers compression
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: f64,
    #[serde(default = "default_max_compress_iterations")]
    pub max_compress_iterations: usize,
    /// Minimum relative shrink per iteration before giving up
    #[serde(default = "default_min_shrink_ratio")]
    pub min_shrink_ratio: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            reserve_tokens: default_reserve_tokens(),
            compress_threshold: default_compress_threshold(),
            max_compress_iterations: default_max_compress_iterations(),
            min_shrink_ratio: default_min_shrink_ratio(),
        }
    }
}

/// Push-stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            client_timeout_secs: default_client_timeout_secs(),
            cleanup_secs: default_cleanup_secs(),
            retry_ms: default_retry_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_work_timeout_secs() -> u64 {
    1800
}

fn default_loop_delay_ms() -> u64 {
    2000
}

fn default_max_rounds() -> usize {
    64
}

fn default_marker_tag() -> String {
    autoprovider_tools::DEFAULT_MARKER_TAG.to_string()
}

fn default_path_root() -> String {
    autoprovider_tools::executor::DEFAULT_PATH_ROOT.to_string()
}

fn default_reserve_tokens() -> u32 {
    20
}

fn default_compress_threshold() -> f64 {
    0.95
}

fn default_max_compress_iterations() -> usize {
    5
}

fn default_min_shrink_ratio() -> f64 {
    0.10
}

fn default_heartbeat_secs() -> u64 {
    20
}

fn default_client_timeout_secs() -> u64 {
    120
}

fn default_cleanup_secs() -> u64 {
    30
}

fn default_retry_ms() -> u64 {
    3000
}

fn default_system_prompt() -> String {
    crate::services::agent::prompts::DEFAULT_SYSTEM_PROMPT.to_string()
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Load from `$AUTOPROVIDER_CONFIG`, or defaults when the variable is unset.
    pub fn load() -> AppResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!("[Config] loading {}", path);
                Self::load_from(path.trim())
            }
            _ => {
                tracing::info!("[Config] {} not set, using defaults", CONFIG_PATH_ENV);
                Ok(Self::default())
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.context.compress_threshold) || self.context.compress_threshold == 0.0 {
            return Err(AppError::config(format!(
                "context.compress_threshold must be in (0, 1], got {}",
                self.context.compress_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.context.min_shrink_ratio) {
            return Err(AppError::config(format!(
                "context.min_shrink_ratio must be in [0, 1), got {}",
                self.context.min_shrink_ratio
            )));
        }
        autoprovider_tools::validate_marker(&self.agent.marker_tag)?;
        if self.agent.max_rounds == 0 {
            return Err(AppError::config("agent.max_rounds must be at least 1"));
        }
        Ok(())
    }
}
