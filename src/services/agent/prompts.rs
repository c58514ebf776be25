//! Agent Prompts
//!
//! Fixed prompt texts used by the work loop and the history compressor, plus
//! placeholder substitution for the system prompt template.

/// Default system prompt template.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Autoprovider, an engineering agent working inside a sandboxed project.

Current time: ${CURRENTTIME} (unix ms ${CURRENTTIMESTAMP})
Project: ${PROJECTID}
Operating system: ${OPERATINGSYSTEM}

Wrap every tool call in a single <function-call> ... </function-call> region.
Inside it, write one upper-case action tag per call with its parameters as
nested upper-case tags, for example:

<function-call>
<CREATE-FILE><FILE-NAME>/app/index.html</FILE-NAME><CONTENT>...</CONTENT></CREATE-FILE>
</function-call>

Available actions: CHAT-TO-USER, CREATE-FILE, DELETE-FILE, EDIT-FILE, READ-FILE,
WEB_SEARCH, FILE-SEARCH, SQL-OPERATION, BASH-OPERATION, CREATE-TODOLIST,
DONE-TODO, LINTER, DEPLOY, REASONERS.

Project files:
${FILESTREE}

Todo list:
${TODOLIST}
"#;

/// Sent after a round that executed tools.
pub const TOOL_CONTINUATION_PROMPT: &str = "The tool results have been delivered to you. Continue working on the user's request. To leave the function-call loop, reply with a normal message that calls no function. (message from the autoprovider system)";

/// Sent after a round without tools while todos remain open.
pub const TODO_CONTINUATION_PROMPT: &str = "You still have unfinished todos, please keep working. To leave the todo loop call the matching action, otherwise the conversation continues. (message from the autoprovider system)";

/// Assistant message appended when the user stops a running task.
pub const TERMINATED_BY_USER: &str = "Task paused by user.";

/// Instruction given to the summarizer model.
pub const COMPRESSION_INSTRUCTION: &str = r#"You compress conversation history for an engineering agent.
Read the JSON array of messages and answer with a JSON object of the form
{"userSummary": "...", "assistantSummary": "..."}.
userSummary: what the user asked for, including constraints and decisions.
assistantSummary: what the assistant did, files touched, results and open problems.
Answer with the JSON object only."#;

/// Prefix of summary messages produced by compression.
pub const SUMMARY_PREFIX: &str = "[History summary]";

/// Why the next round is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationReason {
    ToolResults,
    PendingTodos,
}

impl ContinuationReason {
    pub fn prompt(&self) -> &'static str {
        match self {
            ContinuationReason::ToolResults => TOOL_CONTINUATION_PROMPT,
            ContinuationReason::PendingTodos => TODO_CONTINUATION_PROMPT,
        }
    }
}

/// Values substituted into the system prompt template.
#[derive(Debug, Clone, Default)]
pub struct PromptVariables {
    pub current_time: String,
    pub current_timestamp: i64,
    pub project_id: String,
    pub files_tree: String,
    pub todo_list: String,
    pub operating_system: String,
}

impl PromptVariables {
    /// Variables stamped with the current time and host OS.
    pub fn now(project_id: &str, files_tree: &str, todo_list: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            current_time: now.to_rfc3339(),
            current_timestamp: now.timestamp_millis(),
            project_id: project_id.to_string(),
            files_tree: files_tree.to_string(),
            todo_list: todo_list.to_string(),
            operating_system: std::env::consts::OS.to_string(),
        }
    }
}

/// Replace every `${NAME}` placeholder in `template`.
pub fn render_system_prompt(template: &str, vars: &PromptVariables) -> String {
    template
        .replace("${CURRENTTIME}", &vars.current_time)
        .replace("${CURRENTTIMESTAMP}", &vars.current_timestamp.to_string())
        .replace("${PROJECTID}", &vars.project_id)
        .replace("${FILESTREE}", &vars.files_tree)
        .replace("${TODOLIST}", &vars.todo_list)
        .replace("${OPERATINGSYSTEM}", &vars.operating_system)
}

/// Rewrite the marker name in the default template when a custom marker is configured.
pub fn with_marker(template: &str, marker: &str) -> String {
    let default = autoprovider_tools::DEFAULT_MARKER_TAG;
    if marker.eq_ignore_ascii_case(default) {
        return template.to_string();
    }
    template
        .replace(&format!("<{}>", default), &format!("<{}>", marker))
        .replace(&format!("</{}>", default), &format!("</{}>", marker))
}
