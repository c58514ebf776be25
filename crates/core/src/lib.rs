//! Autoprovider Core
//!
//! Foundational traits, error types and data model for the autoprovider agent
//! runtime. This crate has zero dependencies on application-level code
//! (HTTP surface, model providers, storage).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `context` - Session-scoped execution context and the shared stop flag
//! - `dialogue` - Dialogue messages, turns and operation records
//! - `tool_trait` - Tool contract (`Tool`, `ToolOutcome`) and `ToolRegistry`
//! - `streaming` - Unified stream event types and adapter trait
//! - `framing` - Push-stream frames sent to connected clients

pub mod error;
pub mod context;
pub mod dialogue;
pub mod tool_trait;
pub mod streaming;
pub mod framing;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Context ────────────────────────────────────────────────────────────
pub use context::{SessionContext, StopFlag};

// ── Dialogue Model ─────────────────────────────────────────────────────
pub use dialogue::{
    DialogueMessage, DialogueRole, DialogueTurn, OperationRecord, ToolCallDescriptor,
    SUMMARY_ASSISTANT_INDEX, SUMMARY_USER_INDEX,
};

// ── Tool Contract ──────────────────────────────────────────────────────
pub use tool_trait::{Tool, ToolOutcome, ToolRegistry};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};

// ── Push Framing ───────────────────────────────────────────────────────
pub use framing::{echo_tag, PushFrame, SEGMENT_END_MARKER};
