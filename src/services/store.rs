//! Dialogue Store
//!
//! Persistence boundary for sessions, Works, dialogue rows, operation records,
//! todo state and token usage. The relational schema behind a production
//! deployment is an external collaborator; the agent runtime only talks to
//! the `DialogueStore` trait.
//!
//! `InMemoryDialogueStore` backs the default binary configuration and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use autoprovider_core::{DialogueMessage, OperationRecord};
use autoprovider_llm::UsageStats;

use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Records
// ============================================================================

/// One agent invocation inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub work_id: String,
    pub session_id: String,
    /// 1-based position of the Work within its session
    pub work_index: u32,
    pub created_at: String,
}

/// One entry of a session's todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    #[serde(default)]
    pub done: bool,
}

impl TodoItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            done: false,
        }
    }
}

/// Summary pair written in place of compressed turns.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPair {
    pub user: DialogueMessage,
    pub assistant: DialogueMessage,
}

// ============================================================================
// Trait
// ============================================================================

/// Storage operations used by the agent runtime.
#[async_trait]
pub trait DialogueStore: Send + Sync {
    /// Create the session on first use. A session already bound to another
    /// project is rejected with `Conflict`.
    async fn ensure_session(&self, session_id: &str, project_id: &str) -> AppResult<()>;

    /// Project owning the session, if the session exists.
    async fn session_project(&self, session_id: &str) -> AppResult<Option<String>>;

    /// Record a new Work for the session under the id assigned by the caller.
    async fn create_work(&self, session_id: &str, work_id: &str) -> AppResult<WorkRecord>;

    async fn list_works_newest_first(&self, session_id: &str) -> AppResult<Vec<WorkRecord>>;

    /// Store a message; an empty id is replaced with a fresh one. Returns the stored row.
    async fn append_message(&self, message: DialogueMessage) -> AppResult<DialogueMessage>;

    /// Uncompressed rows of one Work, highest index first.
    async fn list_uncompressed_newest_first(&self, work_id: &str) -> AppResult<Vec<DialogueMessage>>;

    /// Most recent row of the session across all Works.
    async fn last_message(&self, session_id: &str) -> AppResult<Option<DialogueMessage>>;

    /// Next non-negative index within the Work.
    async fn next_index(&self, work_id: &str) -> AppResult<i64>;

    /// Mark `compressed_ids` compressed and insert the summary pair as one
    /// atomic step.
    async fn apply_compression(&self, compressed_ids: &[String], summary: SummaryPair) -> AppResult<()>;

    async fn record_operations(&self, message_id: &str, records: Vec<OperationRecord>) -> AppResult<()>;

    async fn operations_for(&self, message_id: &str) -> AppResult<Vec<OperationRecord>>;

    async fn todo_list(&self, session_id: &str) -> AppResult<Vec<TodoItem>>;

    async fn set_todo_list(&self, session_id: &str, todos: Vec<TodoItem>) -> AppResult<()>;

    async fn has_pending_todos(&self, session_id: &str) -> AppResult<bool> {
        Ok(self.todo_list(session_id).await?.iter().any(|t| !t.done))
    }

    /// Accumulate token usage for a Work.
    async fn record_usage(&self, work_id: &str, usage: UsageStats) -> AppResult<()>;

    async fn usage_for(&self, work_id: &str) -> AppResult<UsageStats>;

    /// Current file/directory listing of the project.
    async fn file_tree(&self, project_id: &str) -> AppResult<String>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<String, String>,
    works: Vec<WorkRecord>,
    messages: Vec<DialogueMessage>,
    operations: HashMap<String, Vec<OperationRecord>>,
    todos: HashMap<String, Vec<TodoItem>>,
    usage: HashMap<String, UsageStats>,
    file_trees: HashMap<String, String>,
}

/// Stores everything in process memory behind a `RwLock`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDialogueStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryDialogueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the file listing reported for a project.
    pub async fn set_file_tree(&self, project_id: &str, tree: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.file_trees.insert(project_id.to_string(), tree.into());
    }

    /// Every stored row of a session in chronological order, compressed ones included.
    pub async fn session_messages(&self, session_id: &str) -> Vec<DialogueMessage> {
        let inner = self.inner.read().await;
        let mut rows: Vec<(u32, DialogueMessage)> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| (work_index(&inner.works, &m.work_id), m.clone()))
            .collect();
        rows.sort_by_key(|(work, m)| (*work, m.index));
        rows.into_iter().map(|(_, m)| m).collect()
    }
}

fn work_index(works: &[WorkRecord], work_id: &str) -> u32 {
    works
        .iter()
        .find(|w| w.work_id == work_id)
        .map(|w| w.work_index)
        .unwrap_or(0)
}

#[async_trait]
impl DialogueStore for InMemoryDialogueStore {
    async fn ensure_session(&self, session_id: &str, project_id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get(session_id) {
            Some(owner) if owner != project_id => Err(AppError::conflict(format!(
                "session {} does not belong to project {}",
                session_id, project_id
            ))),
            Some(_) => Ok(()),
            None => {
                inner
                    .sessions
                    .insert(session_id.to_string(), project_id.to_string());
                Ok(())
            }
        }
    }

    async fn session_project(&self, session_id: &str) -> AppResult<Option<String>> {
        Ok(self.inner.read().await.sessions.get(session_id).cloned())
    }

    async fn create_work(&self, session_id: &str, work_id: &str) -> AppResult<WorkRecord> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            return Err(AppError::not_found(format!("session {}", session_id)));
        }
        if inner.works.iter().any(|w| w.work_id == work_id) {
            return Err(AppError::conflict(format!("work {} already exists", work_id)));
        }
        let work_index = inner
            .works
            .iter()
            .filter(|w| w.session_id == session_id)
            .map(|w| w.work_index)
            .max()
            .unwrap_or(0)
            + 1;
        let record = WorkRecord {
            work_id: work_id.to_string(),
            session_id: session_id.to_string(),
            work_index,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        inner.works.push(record.clone());
        Ok(record)
    }

    async fn list_works_newest_first(&self, session_id: &str) -> AppResult<Vec<WorkRecord>> {
        let inner = self.inner.read().await;
        let mut works: Vec<WorkRecord> = inner
            .works
            .iter()
            .filter(|w| w.session_id == session_id)
            .cloned()
            .collect();
        works.sort_by(|a, b| b.work_index.cmp(&a.work_index));
        Ok(works)
    }

    async fn append_message(&self, mut message: DialogueMessage) -> AppResult<DialogueMessage> {
        if message.work_id.is_empty() {
            return Err(AppError::store("message has no work id"));
        }
        if message.id.is_empty() {
            message.id = uuid::Uuid::new_v4().to_string();
        }
        let mut inner = self.inner.write().await;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn list_uncompressed_newest_first(&self, work_id: &str) -> AppResult<Vec<DialogueMessage>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<DialogueMessage> = inner
            .messages
            .iter()
            .filter(|m| m.work_id == work_id && !m.compressed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.index.cmp(&a.index));
        Ok(rows)
    }

    async fn last_message(&self, session_id: &str) -> AppResult<Option<DialogueMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .max_by_key(|m| (work_index(&inner.works, &m.work_id), m.index))
            .cloned())
    }

    async fn next_index(&self, work_id: &str) -> AppResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.work_id == work_id && m.index >= 0)
            .map(|m| m.index + 1)
            .max()
            .unwrap_or(0))
    }

    async fn apply_compression(&self, compressed_ids: &[String], summary: SummaryPair) -> AppResult<()> {
        // One write guard covers both steps, so readers never see half of it.
        let mut inner = self.inner.write().await;
        for message in inner.messages.iter_mut() {
            if compressed_ids.contains(&message.id) {
                message.compressed = true;
            }
        }
        for mut row in [summary.user, summary.assistant] {
            if row.id.is_empty() {
                row.id = uuid::Uuid::new_v4().to_string();
            }
            inner.messages.push(row);
        }
        Ok(())
    }

    async fn record_operations(&self, message_id: &str, records: Vec<OperationRecord>) -> AppResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        inner
            .operations
            .entry(message_id.to_string())
            .or_default()
            .extend(records);
        Ok(())
    }

    async fn operations_for(&self, message_id: &str) -> AppResult<Vec<OperationRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .operations
            .get(message_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn todo_list(&self, session_id: &str) -> AppResult<Vec<TodoItem>> {
        Ok(self
            .inner
            .read()
            .await
            .todos
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_todo_list(&self, session_id: &str, todos: Vec<TodoItem>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.todos.insert(session_id.to_string(), todos);
        Ok(())
    }

    async fn record_usage(&self, work_id: &str, usage: UsageStats) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let total = inner.usage.entry(work_id.to_string()).or_default();
        total.input_tokens += usage.input_tokens;
        total.output_tokens += usage.output_tokens;
        Ok(())
    }

    async fn usage_for(&self, work_id: &str) -> AppResult<UsageStats> {
        Ok(self
            .inner
            .read()
            .await
            .usage
            .get(work_id)
            .copied()
            .unwrap_or_default())
    }

    async fn file_tree(&self, project_id: &str) -> AppResult<String> {
        Ok(self
            .inner
            .read()
            .await
            .file_trees
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================
