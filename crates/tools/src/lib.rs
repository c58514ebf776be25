//! Autoprovider Tools
//!
//! Turns the model's tagged output stream into ordered tool invocations:
//! - `vocabulary` - action/parameter tag sets and the begin/end marker
//! - `tag_parser` - incremental parser over the cumulative stream buffer
//! - `recovery` - end-of-stream repair of mismatched closing tags
//! - `dispatch` - per-Work FIFO lane executing actions one at a time
//! - `executor` - parameter normalization and tool-result formatting
//!
//! Concrete tool implementations are external collaborators registered in
//! `autoprovider_core::ToolRegistry`.

pub mod dispatch;
pub mod executor;
pub mod recovery;
pub mod tag_parser;
pub mod vocabulary;

pub use dispatch::{DispatchLane, DispatchReport, DispatchedAction, EnqueueOutcome, LaneObserver};
pub use executor::{format_tool_results, PathNormalizer};
pub use recovery::{apply_completions, recover, RecoveryOutcome};
pub use tag_parser::{Action, ActionIdentity, CompletionTask, TagStreamParser};
pub use vocabulary::{to_camel_case, validate_marker, TagVocabulary, DEFAULT_MARKER_TAG};
