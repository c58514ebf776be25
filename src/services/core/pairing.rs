//! Tool-Call Pairing Repair
//!
//! Chat-completion APIs reject a prompt in which an assistant tool call is not
//! answered by a tool message, or a tool message answers no call. History
//! compression and partially persisted rounds can produce both shapes, so the
//! final prompt is repaired before it is sent:
//!
//! - an assistant message whose calls are not all answered by the run of tool
//!   messages right after it loses its call descriptors;
//! - a tool message that answers no call of the nearest preceding
//!   assistant-with-calls becomes a plain assistant message.

use std::collections::HashSet;

use autoprovider_core::DialogueRole;
use autoprovider_llm::ChatMessage;

/// Prefix of tool results demoted to assistant text.
pub const ORPHAN_RESULT_PREFIX: &str = "[historical tool result]";

/// Statistics of one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingReport {
    /// Assistant messages whose call descriptors were removed
    pub stripped_calls: usize,
    /// Tool messages relabeled as assistant text
    pub relabeled_results: usize,
}

impl PairingReport {
    pub fn is_clean(&self) -> bool {
        self.stripped_calls == 0 && self.relabeled_results == 0
    }
}

/// Repair tool-call pairing across `messages`.
pub fn repair_tool_pairs(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    repair_tool_pairs_with_report(messages).0
}

/// Same as [`repair_tool_pairs`], also returning what was changed.
pub fn repair_tool_pairs_with_report(messages: Vec<ChatMessage>) -> (Vec<ChatMessage>, PairingReport) {
    let fully_answered: Vec<bool> = (0..messages.len())
        .map(|i| calls_answered(&messages, i))
        .collect();

    let mut report = PairingReport::default();
    let mut open_calls: Option<HashSet<String>> = None;
    let mut repaired = Vec::with_capacity(messages.len());

    for (i, mut message) in messages.into_iter().enumerate() {
        match message.role {
            DialogueRole::Assistant if message.has_tool_calls() => {
                if fully_answered[i] {
                    open_calls = Some(message.tool_calls.iter().map(|c| c.id.clone()).collect());
                } else {
                    if message.content.trim().is_empty() {
                        let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
                        message.content = format!("[history] called {}", names.join(", "));
                    }
                    message.tool_calls.clear();
                    open_calls = None;
                    report.stripped_calls += 1;
                }
                repaired.push(message);
            }
            DialogueRole::Tool => {
                let answered = match (&open_calls, &message.tool_call_id) {
                    (Some(open), Some(id)) => open.contains(id),
                    _ => false,
                };
                if answered {
                    repaired.push(message);
                } else {
                    report.relabeled_results += 1;
                    repaired.push(ChatMessage::assistant(format!(
                        "{} {}",
                        ORPHAN_RESULT_PREFIX, message.content
                    )));
                }
            }
            _ => {
                open_calls = None;
                repaired.push(message);
            }
        }
    }

    if !report.is_clean() {
        tracing::debug!(
            stripped = report.stripped_calls,
            relabeled = report.relabeled_results,
            "[Pairing] repaired tool-call pairing"
        );
    }
    (repaired, report)
}

/// Whether every call of the assistant message at `index` is answered by the
/// tool messages directly following it.
fn calls_answered(messages: &[ChatMessage], index: usize) -> bool {
    let message = &messages[index];
    if message.role != DialogueRole::Assistant || !message.has_tool_calls() {
        return false;
    }
    let answered: HashSet<&str> = messages[index + 1..]
        .iter()
        .take_while(|m| m.role == DialogueRole::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    message
        .tool_calls
        .iter()
        .all(|call| answered.contains(call.id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprovider_core::ToolCallDescriptor;

    fn call(id: &str, name: &str) -> ToolCallDescriptor {
        ToolCallDescriptor::new(id, name, "{}")
    }

    // ── Well-formed input ──

    #[test]
    fn test_paired_sequence_untouched() {
        let messages = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant("working").with_tool_calls(vec![call("a", "readFile"), call("b", "linter")]),
            ChatMessage::tool("a", "file body"),
            ChatMessage::tool("b", "no issues"),
            ChatMessage::user("next"),
        ];
        let (repaired, report) = repair_tool_pairs_with_report(messages.clone());
        assert!(report.is_clean());
        assert_eq!(repaired, messages);
    }

    // ── Broken pairs ──

    #[test]
    fn test_partial_answers_strip_all_calls() {
        let messages = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant("").with_tool_calls(vec![call("a", "createFile"), call("b", "linter")]),
            ChatMessage::tool("a", "created"),
        ];
        let (repaired, report) = repair_tool_pairs_with_report(messages);

        assert_eq!(report.stripped_calls, 1);
        assert_eq!(report.relabeled_results, 1);
        assert!(!repaired[1].has_tool_calls());
        assert_eq!(repaired[1].content, "[history] called createFile, linter");
        assert_eq!(repaired[2].role, DialogueRole::Assistant);
        assert_eq!(repaired[2].content, "[historical tool result] created");
        assert!(repaired[2].tool_call_id.is_none());
    }

    #[test]
    fn test_orphan_tool_after_plain_message() {
        let messages = vec![
            ChatMessage::assistant("").with_tool_calls(vec![call("a", "readFile")]),
            ChatMessage::tool("a", "ok"),
            ChatMessage::user("interjection"),
            ChatMessage::tool("a", "late"),
        ];
        let repaired = repair_tool_pairs(messages);
        assert!(repaired[0].has_tool_calls());
        assert_eq!(repaired[1].role, DialogueRole::Tool);
        assert_eq!(repaired[3].role, DialogueRole::Assistant);
    }

    #[test]
    fn test_tool_with_unknown_id_relabeled() {
        let messages = vec![
            ChatMessage::assistant("x").with_tool_calls(vec![call("a", "readFile")]),
            ChatMessage::tool("a", "ok"),
            ChatMessage::tool("zzz", "stray"),
        ];
        let (repaired, report) = repair_tool_pairs_with_report(messages);
        assert_eq!(report.relabeled_results, 1);
        assert_eq!(report.stripped_calls, 0);
        assert_eq!(repaired[2].content, "[historical tool result] stray");
    }

    #[test]
    fn test_answer_separated_by_other_message_not_counted() {
        let messages = vec![
            ChatMessage::assistant("keep me").with_tool_calls(vec![call("a", "readFile")]),
            ChatMessage::system("note"),
            ChatMessage::tool("a", "ok"),
        ];
        let repaired = repair_tool_pairs(messages);
        assert!(!repaired[0].has_tool_calls());
        assert_eq!(repaired[0].content, "keep me");
        assert_eq!(repaired[2].role, DialogueRole::Assistant);
    }

    #[test]
    fn test_empty_input() {
        assert!(repair_tool_pairs(Vec::new()).is_empty());
    }
}
