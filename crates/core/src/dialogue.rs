//! Dialogue Model
//!
//! Persisted conversation rows and the grouping used to assemble context.
//! A `DialogueTurn` is one user message plus every assistant/tool message
//! produced before the next user message.

use serde::{Deserialize, Serialize};

/// Index of the synthetic user message of a compression summary pair.
pub const SUMMARY_USER_INDEX: i64 = -2;

/// Index of the synthetic assistant message of a compression summary pair.
pub const SUMMARY_ASSISTANT_INDEX: i64 = -1;

/// Role of a dialogue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueRole {
    User,
    Assistant,
    Tool,
    System,
}

impl DialogueRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueRole::User => "user",
            DialogueRole::Assistant => "assistant",
            DialogueRole::Tool => "tool",
            DialogueRole::System => "system",
        }
    }
}

impl std::fmt::Display for DialogueRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured tool call attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDescriptor {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One persisted dialogue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub id: String,
    pub session_id: String,
    pub work_id: String,
    pub role: DialogueRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Position within the Work; negative for summary rows.
    pub index: i64,
    #[serde(default)]
    pub compressed: bool,
    /// Who authored the row when it differs from `role` (e.g. `"system"` for
    /// continuation prompts persisted as user messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl DialogueMessage {
    pub fn new(role: DialogueRole, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            session_id: String::new(),
            work_id: String::new(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            index: 0,
            compressed: false,
            sender: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(DialogueRole::System, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(DialogueRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallDescriptor>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Attach the owning session and Work.
    pub fn in_work(mut self, session_id: impl Into<String>, work_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self.work_id = work_id.into();
        self
    }

    pub fn is_summary(&self) -> bool {
        self.index < 0
    }
}

/// One user message plus the assistant/tool messages that answered it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub messages: Vec<DialogueMessage>,
}

impl DialogueTurn {
    pub fn new(messages: Vec<DialogueMessage>) -> Self {
        Self { messages }
    }

    /// The opening user message, if present.
    pub fn user_message(&self) -> Option<&DialogueMessage> {
        self.messages.first().filter(|m| m.role == DialogueRole::User)
    }

    /// Row ids of every message in the turn.
    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn is_summary(&self) -> bool {
        self.messages.iter().any(DialogueMessage::is_summary)
    }
}

/// A tool invocation recorded against the assistant message that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Action name (camelCase, e.g. `createFile`)
    pub method: String,
    /// JSON `{ "<method>": <parameters> }`
    pub code: String,
    /// Tool status once known (0 success, 1 failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    /// Dispatch order within the Work
    pub index: usize,
}
