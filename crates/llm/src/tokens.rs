//! Token Budget Estimator
//!
//! Character-class heuristic used for every budget decision. It is not a real
//! tokenizer; it only needs to be stable and to over-count CJK text, which
//! tokenizes far denser than ASCII.

use crate::types::ChatMessage;

/// Fixed per-message overhead (role markers, separators).
const MESSAGE_OVERHEAD: f64 = 4.0;

/// Fixed overhead for a whole message list (reply priming).
const LIST_OVERHEAD: usize = 2;

fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}

fn char_weight(ch: char) -> f64 {
    if is_cjk(ch) {
        1.5
    } else if ch.is_ascii_alphabetic() {
        0.25
    } else if ch.is_ascii_digit() {
        0.5
    } else if ch.is_whitespace() {
        0.25
    } else {
        0.5
    }
}

fn raw_tokens(text: &str) -> f64 {
    text.chars().map(char_weight).sum()
}

/// Estimated token count of a string, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    raw_tokens(text).ceil() as usize
}

/// Estimated token count of a prompt.
pub fn estimate_message_tokens(messages: &[ChatMessage]) -> usize {
    if messages.is_empty() {
        return 0;
    }
    let mut total = 0.0;
    for msg in messages {
        total += MESSAGE_OVERHEAD;
        total += raw_tokens(&msg.content);
        total += raw_tokens(msg.role.as_str());
        if !msg.tool_calls.is_empty() {
            let calls = serde_json::to_string(&msg.tool_calls).unwrap_or_default();
            total += raw_tokens(&calls);
        }
        if let Some(id) = &msg.tool_call_id {
            total += raw_tokens(id);
        }
    }
    total.ceil() as usize + LIST_OVERHEAD
}
