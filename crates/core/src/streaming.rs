//! Model Stream Events
//!
//! Every provider stream is converted into `UnifiedStreamEvent`s before it
//! reaches the agent loop, which only distinguishes visible text, reasoning,
//! accounting and the end of the call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One event of a model stream, independent of the provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Visible answer text; may contain action tags
    TextDelta { content: String },

    ThinkingStart,

    /// Reasoning text, never parsed for actions
    ThinkingDelta { content: String },

    ThinkingEnd,

    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },

    /// Provider-reported problem inside an otherwise open stream
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::ThinkingDelta {
            content: content.into(),
        }
    }

    /// Text carried by a text or reasoning delta.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::TextDelta { content } | Self::ThinkingDelta { content } => Some(content),
            _ => None,
        }
    }
}

/// A provider chunk that could not be turned into events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The chunk is not in the provider's framing
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// The chunk payload is not valid JSON
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::ParseError(err.to_string())
    }
}

/// Converts one provider's raw stream chunks into unified events.
pub trait StreamAdapter: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Adapt one raw chunk; it may yield any number of events.
    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>;

    /// Forget per-stream state before the next call.
    fn reset(&mut self) {}
}
