//! Stream Adapters
//!
//! - `openai` - OpenAI-compatible SSE chunks to unified events
//! - `think_tags` - splits inline `<think>..</think>` text into reasoning events

pub mod openai;
pub mod think_tags;

pub use openai::OpenAIAdapter;
pub use think_tags::ThinkTagSplitter;
