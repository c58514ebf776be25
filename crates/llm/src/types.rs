//! LLM Types
//!
//! Chat messages, model configuration, responses and errors shared by the
//! provider implementations and the agent work loop.

use serde::{Deserialize, Serialize};

use autoprovider_core::dialogue::{DialogueMessage, DialogueRole, ToolCallDescriptor};

/// Smallest context window accepted from configuration.
pub const MIN_TOKEN_LIMIT: u32 = 10_000;

/// Context window used when none (or an implausible one) is configured.
pub const DEFAULT_TOKEN_LIMIT: u32 = 130_000;

// ============================================================================
// Chat messages
// ============================================================================

/// A message in the prompt sent to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: DialogueRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: DialogueRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::Assistant, content)
    }

    /// Tool response answering the call with `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: DialogueRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallDescriptor>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<&DialogueMessage> for ChatMessage {
    fn from(msg: &DialogueMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// One entry of the model priority list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name used in logs
    #[serde(default)]
    pub label: String,
    /// OpenAI-compatible endpoint, e.g. `https://api.example.com/v1`
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// Context window in tokens
    #[serde(default = "default_token_limit")]
    pub token_limit: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_token_limit() -> u32 {
    DEFAULT_TOKEN_LIMIT
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            token_limit: default_token_limit(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl ModelConfig {
    /// Whether the entry carries everything needed to call the model.
    pub fn is_usable(&self) -> bool {
        !self.base_url.trim().is_empty()
            && !self.model.trim().is_empty()
            && !self.api_key.trim().is_empty()
    }

    /// Configured token limit, falling back to the default when implausibly small.
    pub fn effective_token_limit(&self) -> u32 {
        if self.token_limit >= MIN_TOKEN_LIMIT {
            self.token_limit
        } else {
            DEFAULT_TOKEN_LIMIT
        }
    }

    /// Name used in logs.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.model
        } else {
            &self.label
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequestOptions {
    pub temperature_override: Option<f32>,
    /// Ask for a JSON object response (`response_format: json_object`).
    pub json_response: bool,
}

// ============================================================================
// Responses
// ============================================================================

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl UsageStats {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Stop reason for the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    EndTurn,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped at a stop sequence
    StopSequence,
    /// Model wants to use a tool
    ToolUse,
    /// Other/unknown reason
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Text content of the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning content reported separately by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Why the response ended
    pub stop_reason: StopReason,
    /// Token usage, when the provider reported it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    /// Model that produced the response
    pub model: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Error types for LLM operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    /// Model not found or not available
    ModelNotFound { model: String },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Server error from the provider
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    NetworkError { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// Provider not available (misconfigured or unreachable)
    ProviderUnavailable { message: String },
    /// Call exceeded its time budget
    Timeout { seconds: u64 },
    /// Call aborted by the caller
    Cancelled,
    /// Other error
    Other { message: String },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            LlmError::RateLimited { message, .. } => {
                write!(f, "Rate limited: {}", message)
            }
            LlmError::ModelNotFound { model } => {
                write!(f, "Model not found: {}", model)
            }
            LlmError::InvalidRequest { message } => {
                write!(f, "Invalid request: {}", message)
            }
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::NetworkError { message } => {
                write!(f, "Network error: {}", message)
            }
            LlmError::ParseError { message } => {
                write!(f, "Parse error: {}", message)
            }
            LlmError::ProviderUnavailable { message } => {
                write!(f, "Provider unavailable: {}", message)
            }
            LlmError::Timeout { seconds } => {
                write!(f, "Timed out after {}s", seconds)
            }
            LlmError::Cancelled => write!(f, "Cancelled"),
            LlmError::Other { message } => {
                write!(f, "Error: {}", message)
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_str() {
        assert_eq!(StopReason::from("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::from("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from("tool_calls"), StopReason::ToolUse);
        assert_eq!(
            StopReason::from("content_filter"),
            StopReason::Other("content_filter".to_string())
        );
    }

    #[test]
    fn test_model_config_usable() {
        let mut config = ModelConfig {
            base_url: "https://api.example.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            ..Default::default()
        };
        assert!(!config.is_usable());
        config.api_key = "sk-test".to_string();
        assert!(config.is_usable());
    }

    #[test]
    fn test_effective_token_limit_floor() {
        let config = ModelConfig {
            token_limit: 4096,
            ..Default::default()
        };
        assert_eq!(config.effective_token_limit(), DEFAULT_TOKEN_LIMIT);

        let config = ModelConfig {
            token_limit: 64_000,
            ..Default::default()
        };
        assert_eq!(config.effective_token_limit(), 64_000);
    }

    #[test]
    fn test_display_name_falls_back_to_model() {
        let config = ModelConfig {
            model: "qwen-max".to_string(),
            ..Default::default()
        };
        assert_eq!(config.display_name(), "qwen-max");
    }

    #[test]
    fn test_chat_message_from_dialogue() {
        let row = DialogueMessage::tool("call-1", "done");
        let msg = ChatMessage::from(&row);
        assert_eq!(msg.role, DialogueRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_llm_error_serialization() {
        let err = LlmError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(3),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"rate_limited\""));
        assert_eq!(err.to_string(), "Rate limited: slow down");
    }
}
