//! Push-Stream Framing
//!
//! Frames delivered to a connected client over its long-lived event stream.
//! Content is wrapped in a small fixed set of elements:
//!
//! - `<words>..</words>` on event `agent-words` for user-visible text
//! - `<through>..</through>` on event `agent-thinking` for reasoning
//! - `<tag>..</tag>` on event `message` echoing one tool operation
//!
//! A segment is closed by sending the element with `OVERFLAG` as its body.

use serde::Serialize;

/// Body that marks the end of a streaming segment.
pub const SEGMENT_END_MARKER: &str = "OVERFLAG";

pub const EVENT_WORDS: &str = "agent-words";
pub const EVENT_THINKING: &str = "agent-thinking";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_ERROR: &str = "agent-error";
pub const EVENT_CLOSE: &str = "close";

/// One outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    /// Named event with a text payload.
    Event { event: String, data: String },
    /// Keep-alive comment.
    Heartbeat { timestamp: String },
    /// Client reconnection delay hint.
    Retry { millis: u64 },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClosePayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    reason: &'a str,
    timestamp: &'a str,
}

impl PushFrame {
    pub fn event(event: impl Into<String>, data: impl Into<String>) -> Self {
        PushFrame::Event {
            event: event.into(),
            data: data.into(),
        }
    }

    /// User-visible text delta.
    pub fn words(text: &str) -> Self {
        Self::event(EVENT_WORDS, format!("<words>{}</words>", text))
    }

    /// Reasoning text delta.
    pub fn thinking(text: &str) -> Self {
        Self::event(EVENT_THINKING, format!("<through>{}</through>", text))
    }

    pub fn words_end() -> Self {
        Self::words(SEGMENT_END_MARKER)
    }

    pub fn thinking_end() -> Self {
        Self::thinking(SEGMENT_END_MARKER)
    }

    /// Echo of a dispatched operation, wrapped in the element for its tool kind.
    pub fn operation(action_name: &str, content: &str) -> Self {
        let tag = echo_tag(action_name);
        Self::event(EVENT_MESSAGE, format!("<{tag}>{content}</{tag}>"))
    }

    pub fn error(message: &str) -> Self {
        Self::event(EVENT_ERROR, message)
    }

    /// Final frame flushed before a stream is closed.
    pub fn close(reason: Option<&str>, timestamp: &str) -> Self {
        match reason {
            Some(reason) => {
                let payload = ClosePayload {
                    kind: "CONNECTION_CLOSED",
                    reason,
                    timestamp,
                };
                let data = serde_json::to_string(&payload)
                    .unwrap_or_else(|_| "connection closed".to_string());
                Self::event(EVENT_CLOSE, data)
            }
            None => Self::event(EVENT_CLOSE, "connection closed"),
        }
    }

    /// Event name, if this frame is a named event.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            PushFrame::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Event payload, if this frame is a named event.
    pub fn data(&self) -> Option<&str> {
        match self {
            PushFrame::Event { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Element name used to echo an operation of the given action.
///
/// Accepts both camelCase action names (`createFile`) and snake_case tool
/// kinds (`create_file`). Unknown kinds echo under their snake_case name.
pub fn echo_tag(action_name: &str) -> String {
    let kind = to_snake_case(action_name);
    let tag = match kind.as_str() {
        "create_file" => "create",
        "delete_file" => "delete",
        "edit_file" => "edit",
        "read_file" => "read",
        "web_search" => "websearch",
        "web_read" => "webread",
        "sql_operation" => "sql",
        "bash_operation" => "ran",
        "create_todolist" | "done_todo" => "createtodolist",
        "linter" => "linter",
        "deploy" => "deploy",
        "grep_file" => "grep_file",
        _ => return kind,
    };
    tag.to_string()
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}
