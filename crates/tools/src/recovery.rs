//! Error-Recovery Pass
//!
//! Runs once after the model stream ends. Mismatched closing tags recorded by
//! the parser are repaired by inserting the missing `</expected>` tags, and
//! the corrected transcript is reparsed from the start.
//!
//! The reparse keeps the parser's stream generation, and every reparsed
//! action has its `origin` mapped back past the inserted tags. An action that
//! was already dispatched while streaming therefore keeps its identity even
//! when the repair changed its parameters, and the dispatch lane drops it;
//! only actions the repair newly completed are run.

use crate::tag_parser::{Action, CompletionTask, TagStreamParser};

/// Result of the recovery pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    /// Authoritative transcript to persist.
    pub corrected: String,
    /// Whether any completion was inserted.
    pub changed: bool,
    /// Actions produced by the reparse (empty when nothing changed).
    pub actions: Vec<Action>,
}

/// Closing tags to insert, as `(offset in buffer, tag)` in ascending order.
fn insertions(buffer: &str, tasks: &[CompletionTask]) -> Vec<(usize, String)> {
    let mut planned: Vec<(usize, String)> = tasks
        .iter()
        .map(|task| {
            let mut at = task.insert_position.min(buffer.len());
            while !buffer.is_char_boundary(at) {
                at -= 1;
            }
            (at, format!("</{}>", task.expected))
        })
        .collect();
    planned.sort_by_key(|(at, _)| *at);
    planned
}

/// Insert each task's closing tag, rightmost first so earlier offsets stay valid.
pub fn apply_completions(buffer: &str, tasks: &[CompletionTask]) -> String {
    let mut corrected = buffer.to_string();
    for (at, tag) in insertions(buffer, tasks).iter().rev() {
        corrected.insert_str(*at, tag);
    }
    corrected
}

/// Translate an offset in the corrected text back to the streamed text.
fn streamed_offset(corrected_offset: usize, inserted: &[(usize, String)]) -> usize {
    let mut shift = 0;
    for (at, tag) in inserted {
        if at + shift > corrected_offset {
            break;
        }
        shift += tag.len();
    }
    corrected_offset - shift
}

/// Apply the parser's pending completion tasks to `buffer` and reparse.
pub fn recover(parser: &mut TagStreamParser, buffer: &str) -> RecoveryOutcome {
    let tasks = parser.completion_tasks().to_vec();
    if tasks.is_empty() {
        return RecoveryOutcome {
            corrected: buffer.to_string(),
            changed: false,
            actions: Vec::new(),
        };
    }

    let inserted = insertions(buffer, &tasks);
    let corrected = apply_completions(buffer, &tasks);
    tracing::info!(
        "[Recovery] applied {} completion(s), reparsing {} bytes",
        tasks.len(),
        corrected.len()
    );

    parser.reset();
    let mut actions = parser.feed_all(&corrected);
    for action in &mut actions {
        action.origin = streamed_offset(action.start, &inserted);
    }
    if !parser.completion_tasks().is_empty() {
        tracing::debug!(
            "[Recovery] {} mismatch(es) remain after reparse",
            parser.completion_tasks().len()
        );
    }
    // One bounded reparse only; anything still mismatched is left as text.
    parser.reset();

    RecoveryOutcome {
        changed: corrected != buffer,
        corrected,
        actions,
    }
}
