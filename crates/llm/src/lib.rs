//! Autoprovider LLM
//!
//! Model-facing layer of the agent runtime:
//! - OpenAI-compatible chat completion provider (streaming and one-shot)
//! - Token budget estimation for strings and message lists
//! - Stream adapters (SSE chunk parsing, inline `<think>` tag splitting)
//! - HTTP client factory

pub mod http_client;
pub mod openai;
pub mod provider;
pub mod streaming_adapters;
pub mod tokens;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use tokens::{estimate_message_tokens, estimate_tokens};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::{OpenAIAdapter, ThinkTagSplitter};
