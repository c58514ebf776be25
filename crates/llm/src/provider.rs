//! LLM Provider Trait
//!
//! The seam between the agent runtime and a model API.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatMessage, LlmError, LlmRequestOptions, LlmResponse, LlmResult, ModelConfig};
use autoprovider_core::streaming::UnifiedStreamEvent;

/// One configured model endpoint. The fallback chain holds these in
/// priority order and only ever streams; `send_message` serves the
/// summarizer.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Model identifier sent on the wire
    fn model(&self) -> &str;

    fn config(&self) -> &ModelConfig;

    /// Token limit the context assembler budgets against.
    fn context_window(&self) -> u32 {
        self.config().effective_token_limit()
    }

    async fn send_message(
        &self,
        messages: Vec<ChatMessage>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Stream a response via a channel.
    ///
    /// Text and reasoning deltas are forwarded on `tx` as they arrive; the
    /// returned response carries the accumulated content and usage.
    async fn stream_message(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;
}

/// Error for a model entry that has no API key.
pub fn missing_api_key_error(model: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("no API key configured for model {}", model),
    }
}

/// Map a failed HTTP response to an error the fallback chain can classify.
///
/// Authentication, quota and missing-model answers mark the model as
/// unusable; 429 and 5xx are transient.
pub fn parse_http_error(status: u16, body: &str, model: &str) -> LlmError {
    let body = body.trim();
    match status {
        401 | 403 => LlmError::AuthenticationFailed {
            message: format!("{} rejected the credentials ({})", model, status),
        },
        402 => LlmError::ProviderUnavailable {
            message: format!("{} quota exhausted: {}", model, body),
        },
        404 => LlmError::ModelNotFound {
            model: model.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 | 413 | 422 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
