//! OpenAI-Compatible Provider
//!
//! Implementation of the LlmProvider trait for any endpoint speaking the
//! OpenAI chat-completions protocol (OpenAI, DeepSeek, Qwen compatible mode,
//! GLM, self-hosted gateways).

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::provider::{missing_api_key_error, parse_http_error, LlmProvider};
use super::types::{
    ChatMessage, LlmError, LlmRequestOptions, LlmResponse, LlmResult, ModelConfig, StopReason,
    UsageStats,
};
use crate::http_client::build_http_client;
use crate::streaming_adapters::OpenAIAdapter;
use autoprovider_core::dialogue::DialogueRole;
use autoprovider_core::streaming::{StreamAdapter, UnifiedStreamEvent};

const COMPLETIONS_PATH: &str = "/chat/completions";

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    config: ModelConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: ModelConfig) -> LlmResult<Self> {
        let client = build_http_client(None)?;
        Ok(Self { config, client })
    }

    /// Full chat-completions URL
    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with(COMPLETIONS_PATH) {
            base.to_string()
        } else {
            format!("{}{}", base, COMPLETIONS_PATH)
        }
    }

    fn api_key(&self) -> LlmResult<&str> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            Err(missing_api_key_error(self.config.display_name()))
        } else {
            Ok(key)
        }
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        stream: bool,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "stream": stream,
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
        });

        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let openai_messages: Vec<serde_json::Value> =
            messages.iter().map(message_to_openai).collect();
        body["messages"] = serde_json::json!(openai_messages);

        if request_options.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        // Add stream options for usage in streaming
        if stream {
            body["stream_options"] = serde_json::json!({
                "include_usage": true
            });
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;
            return Err(parse_http_error(status, &body_text, self.config.display_name()));
        }
        Ok(response)
    }
}

/// Convert a ChatMessage to OpenAI API format
fn message_to_openai(message: &ChatMessage) -> serde_json::Value {
    match message.role {
        DialogueRole::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        DialogueRole::Assistant if message.has_tool_calls() => {
            let tool_calls: Vec<serde_json::Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        }
                    })
                })
                .collect();
            // Some compatible APIs require content even when only tool calls are present.
            let content = if message.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(message.content)
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })
        }
        role => serde_json::json!({
            "role": role.as_str(),
            "content": message.content,
        }),
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn send_message(
        &self,
        messages: Vec<ChatMessage>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, false, &request_options);
        let response = self.post(&body).await?;

        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;
        let parsed: OpenAIResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        let choice = parsed.choices.into_iter().next();
        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn);
        let (content, thinking) = match choice.and_then(|c| c.message) {
            Some(msg) => (msg.content, msg.reasoning_content),
            None => (None, None),
        };

        Ok(LlmResponse {
            content,
            thinking,
            stop_reason,
            usage: parsed
                .usage
                .map(|u| UsageStats::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn stream_message(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, true, &request_options);
        let response = self.post(&body).await?;

        // Process SSE stream
        let mut adapter = OpenAIAdapter::new();
        let mut accumulated_content = String::new();
        let mut accumulated_thinking = String::new();
        let mut usage = None;
        let mut stop_reason = StopReason::EndTurn;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines
            while let Some(line_end) = buffer.find('\n') {
                let line: String = buffer.drain(..=line_end).collect();
                if line.trim().is_empty() {
                    continue;
                }

                match adapter.adapt(&line) {
                    Ok(events) => {
                        for event in events {
                            match &event {
                                UnifiedStreamEvent::TextDelta { content } => {
                                    accumulated_content.push_str(content);
                                }
                                UnifiedStreamEvent::ThinkingDelta { content } => {
                                    accumulated_thinking.push_str(content);
                                }
                                UnifiedStreamEvent::Usage {
                                    input_tokens,
                                    output_tokens,
                                } => {
                                    usage = Some(UsageStats::new(*input_tokens, *output_tokens));
                                }
                                UnifiedStreamEvent::Complete {
                                    stop_reason: Some(reason),
                                } => {
                                    stop_reason = StopReason::from(reason.as_str());
                                }
                                _ => {}
                            }

                            // Usage and completion are reported through the returned response.
                            if !matches!(
                                &event,
                                UnifiedStreamEvent::Complete { .. } | UnifiedStreamEvent::Usage { .. }
                            ) && tx.send(event).await.is_err()
                            {
                                return Err(LlmError::Cancelled);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!("[OpenAIProvider] skipping malformed chunk: {}", e);
                    }
                }
            }
        }

        Ok(LlmResponse {
            content: (!accumulated_content.is_empty()).then_some(accumulated_content),
            thinking: (!accumulated_thinking.is_empty()).then_some(accumulated_thinking),
            stop_reason,
            usage,
            model: self.config.model.clone(),
        })
    }
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
