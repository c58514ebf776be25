//! Context Maintenance
//!
//! Keeps the prompt history valid and inside its budget:
//!
//! - `compaction` - `HistoryCompressor`, the `Summarizer` contract and its model-backed implementation
//! - `pairing` - Tool-call / tool-result pairing repair applied to every final prompt

pub mod compaction;
pub mod pairing;

// ── History Compression ──────────────────────────────────────────────
pub use compaction::{
    parse_summary, turn_tokens, CompressionResult, HistoryCompressor, LlmSummarizer, ParsedSummary,
    Summarizer, UnavailableSummarizer,
};

// ── Pairing Repair ───────────────────────────────────────────────────
pub use pairing::{repair_tool_pairs, repair_tool_pairs_with_report, PairingReport};
