//! Context Assembler
//!
//! Builds the prompt for one agent round:
//!
//! ```text
//! preamble (system prompt, file tree, context info, todo list)
//!   + history (compressed to budget, tool pairing repaired)
//!   + new user message
//! ```
//!
//! History is read from the store as DialogueTurns: Works newest first, each
//! Work's uncompressed rows newest first, closing a turn at every user row.

use std::sync::Arc;

use autoprovider_core::{DialogueMessage, DialogueRole, DialogueTurn, SessionContext};
use autoprovider_llm::ChatMessage;

use super::budget::TokenBudget;
use crate::models::config::ContextConfig;
use crate::services::agent::prompts::{render_system_prompt, PromptVariables};
use crate::services::core::{repair_tool_pairs, CompressionResult, HistoryCompressor};
use crate::services::store::DialogueStore;
use crate::utils::error::AppResult;

/// Prompt ready to send, with the accounting that produced it.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    pub budget: TokenBudget,
    /// Turns included after compression
    pub history_turns: usize,
    pub compression: CompressionResult,
}

pub struct ContextAssembler {
    store: Arc<dyn DialogueStore>,
    compressor: Arc<HistoryCompressor>,
    config: ContextConfig,
    /// Template with `${...}` placeholders
    system_prompt: String,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn DialogueStore>,
        compressor: Arc<HistoryCompressor>,
        config: ContextConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            compressor,
            config,
            system_prompt: system_prompt.into(),
        }
    }

    /// Fixed system messages opening every prompt.
    pub async fn preamble(&self, ctx: &SessionContext) -> AppResult<Vec<ChatMessage>> {
        let files_tree = self.store.file_tree(&ctx.project_id).await?;
        let todos = self.store.todo_list(&ctx.session_id).await?;
        let todo_json = serde_json::to_string(&todos)?;

        let vars = PromptVariables::now(&ctx.project_id, &files_tree, &todo_json);
        let context_info = serde_json::json!({
            "sessionId": ctx.session_id,
            "workId": ctx.work_id,
            "projectId": ctx.project_id,
            "currentTime": vars.current_time,
        });

        let mut preamble = vec![
            ChatMessage::system(render_system_prompt(&self.system_prompt, &vars)),
            ChatMessage::system(format!("Current project file tree:\n{}", files_tree)),
            ChatMessage::system(format!(
                "Context information for the current task (fetched live, no need to read it again):\n{}",
                context_info
            )),
        ];
        if !todos.is_empty() {
            preamble.push(ChatMessage::system(format!(
                "Todo list of this session:\n{}",
                todo_json
            )));
        }
        Ok(preamble)
    }

    /// Uncompressed history of the session, oldest turn first.
    pub async fn load_history(&self, session_id: &str) -> AppResult<Vec<DialogueTurn>> {
        let mut rows = Vec::new();
        for work in self.store.list_works_newest_first(session_id).await? {
            rows.extend(self.store.list_uncompressed_newest_first(&work.work_id).await?);
        }
        let mut turns = group_turns(rows);
        turns.reverse();
        Ok(turns)
    }

    /// Build the full prompt for `new_message` against a `token_limit` context window.
    pub async fn assemble(
        &self,
        ctx: &SessionContext,
        new_message: &ChatMessage,
        token_limit: u32,
    ) -> AppResult<AssembledPrompt> {
        let preamble = self.preamble(ctx).await?;
        let budget = TokenBudget::compute(token_limit, &preamble, self.config.reserve_tokens, new_message);
        tracing::debug!(
            session_id = %ctx.session_id,
            limit = budget.limit,
            preamble = budget.preamble_tokens,
            history_budget = budget.history_budget,
            "[Assembler] token budget"
        );

        let history = self.load_history(&ctx.session_id).await?;
        let compression = self
            .compressor
            .compress(history, budget.history_budget, &ctx.session_id, &ctx.work_id)
            .await;

        let history_messages: Vec<ChatMessage> = compression
            .turns
            .iter()
            .flat_map(|t| t.messages.iter().map(ChatMessage::from))
            .collect();

        let mut messages = preamble;
        messages.extend(repair_tool_pairs(history_messages));
        messages.push(new_message.clone());

        Ok(AssembledPrompt {
            messages: merge_system_messages(messages),
            budget,
            history_turns: compression.turns.len(),
            compression,
        })
    }
}

/// Group rows given newest first into turns, newest turn first.
///
/// Assistant and tool rows wait on a stack until the user row that opened
/// them is reached. Rows older than the oldest user row are dropped.
pub fn group_turns(rows_newest_first: impl IntoIterator<Item = DialogueMessage>) -> Vec<DialogueTurn> {
    let mut turns = Vec::new();
    let mut pending: Vec<DialogueMessage> = Vec::new();

    for row in rows_newest_first {
        if row.role == DialogueRole::User {
            let mut messages = Vec::with_capacity(pending.len() + 1);
            messages.push(row);
            while let Some(reply) = pending.pop() {
                messages.push(reply);
            }
            turns.push(DialogueTurn::new(messages));
        } else {
            pending.push(row);
        }
    }

    if !pending.is_empty() {
        tracing::debug!(dropped = pending.len(), "[Assembler] dropping rows without a user message");
    }
    turns
}

/// Join runs of consecutive system messages with a blank line.
pub fn merge_system_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == DialogueRole::System && message.role == DialogueRole::System => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => merged.push(message),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::UnavailableSummarizer;
    use crate::services::store::{InMemoryDialogueStore, TodoItem};

    fn row(role: DialogueRole, content: &str, work: &str, index: i64) -> DialogueMessage {
        DialogueMessage::new(role, content)
            .in_work("s1", work)
            .with_index(index)
    }

    fn assembler(store: &InMemoryDialogueStore) -> ContextAssembler {
        let store: Arc<dyn DialogueStore> = Arc::new(store.clone());
        let compressor = HistoryCompressor::new(Arc::new(UnavailableSummarizer), store.clone(), ContextConfig::default());
        ContextAssembler::new(
            store,
            Arc::new(compressor),
            ContextConfig::default(),
            "Project ${PROJECTID} on ${OPERATINGSYSTEM}",
        )
    }

    // ── Turn grouping ──

    #[test]
    fn test_group_turns_from_newest_rows() {
        let rows = vec![
            row(DialogueRole::Tool, "t2", "w2", 3),
            row(DialogueRole::Assistant, "a2", "w2", 2),
            row(DialogueRole::User, "u2", "w2", 1),
            row(DialogueRole::Assistant, "a1", "w1", 1),
            row(DialogueRole::User, "u1", "w1", 0),
            row(DialogueRole::Assistant, "orphan", "w0", 0),
        ];
        let turns = group_turns(rows);
        assert_eq!(turns.len(), 2);
        let contents: Vec<&str> = turns[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u2", "a2", "t2"]);
        assert_eq!(turns[1].user_message().unwrap().content, "u1");
    }

    #[test]
    fn test_merge_system_messages() {
        let merged = merge_system_messages(vec![
            ChatMessage::system("a"),
            ChatMessage::system("b"),
            ChatMessage::user("q"),
            ChatMessage::system("c"),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].content, "a\n\nb");
        assert_eq!(merged[2].content, "c");
    }

    // ── Assembly ──

    #[tokio::test]
    async fn test_load_history_across_works() {
        let store = InMemoryDialogueStore::new();
        store.ensure_session("s1", "p1").await.unwrap();
        store.create_work("s1", "w1").await.unwrap();
        store.create_work("s1", "w2").await.unwrap();
        for message in [
            row(DialogueRole::User, "first", "w1", 0),
            row(DialogueRole::Assistant, "reply one", "w1", 1),
            row(DialogueRole::User, "second", "w2", 0),
            row(DialogueRole::Assistant, "reply two", "w2", 1),
        ] {
            store.append_message(message).await.unwrap();
        }

        let turns = assembler(&store).load_history("s1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user_message().unwrap().content, "first");
        assert_eq!(turns[1].messages[1].content, "reply two");
    }

    #[tokio::test]
    async fn test_assemble_prompt_shape() {
        let store = InMemoryDialogueStore::new();
        store.ensure_session("s1", "p1").await.unwrap();
        store.create_work("s1", "w1").await.unwrap();
        store.set_file_tree("p1", "/app\n  index.html").await;
        store.set_todo_list("s1", vec![TodoItem::new("style page")]).await.unwrap();
        store.append_message(row(DialogueRole::User, "hello", "w1", 0)).await.unwrap();
        store.append_message(row(DialogueRole::Assistant, "hi", "w1", 1)).await.unwrap();

        let ctx = SessionContext::new("s1", "w2", "p1");
        let prompt = assembler(&store)
            .assemble(&ctx, &ChatMessage::user("next step"), 100_000)
            .await
            .unwrap();

        // preamble merged into one system message
        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.messages[0].role, DialogueRole::System);
        assert!(prompt.messages[0].content.starts_with("Project p1 on "));
        assert!(prompt.messages[0].content.contains("index.html"));
        assert!(prompt.messages[0].content.contains("style page"));
        assert_eq!(prompt.messages[1].content, "hello");
        assert_eq!(prompt.messages[3].content, "next step");
        assert_eq!(prompt.history_turns, 1);
        assert!(!prompt.compression.did_compress());
        assert!(prompt.budget.history_budget < 100_000);
    }

    #[tokio::test]
    async fn test_preamble_omits_empty_todos() {
        let store = InMemoryDialogueStore::new();
        let ctx = SessionContext::new("s1", "w1", "p1");
        let preamble = assembler(&store).preamble(&ctx).await.unwrap();
        assert_eq!(preamble.len(), 3);
    }
}
