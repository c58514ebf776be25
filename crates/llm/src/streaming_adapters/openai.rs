//! OpenAI-Compatible Stream Adapter
//!
//! Handles the chat-completions SSE format, including the `reasoning_content`
//! delta field emitted by reasoning models on compatible endpoints.

use autoprovider_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

/// One `data:` payload of a chat-completions stream
#[derive(Debug, Deserialize)]
struct OpenAIEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Default)]
pub struct OpenAIAdapter {
    in_reasoning: bool,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reasoning opens a thinking block; the first visible text closes it.
    fn absorb_delta(&mut self, delta: Delta, events: &mut Vec<UnifiedStreamEvent>) {
        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            if !self.in_reasoning {
                self.in_reasoning = true;
                events.push(UnifiedStreamEvent::ThinkingStart);
            }
            events.push(UnifiedStreamEvent::thinking(reasoning));
        }
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.close_reasoning(events);
            events.push(UnifiedStreamEvent::text(content));
        }
    }

    fn close_reasoning(&mut self, events: &mut Vec<UnifiedStreamEvent>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            events.push(UnifiedStreamEvent::ThinkingEnd);
        }
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        // Bare JSON lines are accepted from proxies that strip the SSE prefix
        let json_str = if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else if trimmed.is_empty() || trimmed.starts_with(':') {
            return Ok(vec![]);
        } else {
            trimmed
        };

        if json_str.is_empty() || json_str == "[DONE]" {
            let mut events = vec![];
            self.close_reasoning(&mut events);
            return Ok(events);
        }

        let event: OpenAIEvent = serde_json::from_str(json_str)?;

        let mut events = vec![];

        if let Some(usage) = event.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        for choice in event.choices {
            if let Some(delta) = choice.delta {
                self.absorb_delta(delta, &mut events);
            }
            if let Some(finish_reason) = choice.finish_reason {
                self.close_reasoning(&mut events);
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.in_reasoning = false;
    }
}
