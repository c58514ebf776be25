//! Session Controller
//!
//! Entry points of the chat surface: start a Work, cancel it, reattach a
//! client to it. Conflicts are rejected before any Work exists.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use autoprovider_core::{DialogueMessage, DialogueRole, PushFrame};

use super::scope::{scope, RequestContext};
use super::work::WorkHandle;
use crate::services::agent::prompts::TERMINATED_BY_USER;
use crate::services::agent::AgentRuntime;
use crate::utils::error::{AppError, AppResult};

/// Close reason sent when the user stops a Work.
pub const CANCELLED_REASON: &str = "cancelled by user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub project_id: String,
    pub prompt: String,
    /// Push-stream id; defaults to the session id
    #[serde(default)]
    pub client_id: Option<String>,
}

/// A push stream attached to a running Work.
#[derive(Debug)]
pub struct ChatStream {
    pub work_id: String,
    pub client_id: String,
    pub frames: mpsc::UnboundedReceiver<PushFrame>,
}

pub struct SessionController {
    runtime: Arc<AgentRuntime>,
}

impl SessionController {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Validate the request, register a new Work and start it.
    pub async fn start_chat(&self, request: ChatRequest) -> AppResult<ChatStream> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::validation("prompt must not be empty"));
        }
        if request.session_id.trim().is_empty() || request.project_id.trim().is_empty() {
            return Err(AppError::validation("session_id and project_id are required"));
        }

        let session_id = request.session_id;
        let project_id = request.project_id;
        self.runtime.store().ensure_session(&session_id, &project_id).await?;

        let client_id = request
            .client_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| session_id.clone());
        let work_id = Uuid::new_v4().to_string();
        let mut handle = WorkHandle::new(&work_id, &project_id, &client_id);

        if let Err(existing) = self.runtime.works().add_work(&session_id, handle.clone()) {
            tracing::warn!(
                session_id = %session_id,
                running = %existing.work_id,
                "[SessionController] duplicate run rejected"
            );
            return Err(AppError::conflict(format!(
                "session {} already has a running task",
                session_id
            )));
        }

        let (connection, frames) = self.runtime.push().register(&client_id);
        handle.connection = connection;
        self.runtime.works().rebind_client(&session_id, &client_id, connection);
        let ctx = RequestContext::new(&client_id, &session_id, &work_id, &project_id);
        let runtime = self.runtime.clone();
        tokio::spawn(scope(ctx, async move {
            runtime.run(handle, prompt).await;
        }));

        tracing::info!(
            session_id = %session_id,
            work_id = %work_id,
            client_id = %client_id,
            "[SessionController] chat started"
        );
        Ok(ChatStream {
            work_id,
            client_id,
            frames,
        })
    }

    /// Stop the running Work of `session_id`. Returns whether one was running.
    pub async fn cancel(&self, session_id: &str) -> AppResult<bool> {
        let Some(handle) = self.runtime.works().get_work(session_id).filter(WorkHandle::is_running) else {
            return Ok(false);
        };
        handle.cancel();

        let store = self.runtime.store();
        if let Some(last) = store.last_message(session_id).await? {
            if matches!(last.role, DialogueRole::User | DialogueRole::Tool) {
                let index = store.next_index(&last.work_id).await?;
                store
                    .append_message(
                        DialogueMessage::assistant(TERMINATED_BY_USER)
                            .in_work(session_id, &last.work_id)
                            .with_index(index),
                    )
                    .await?;
            }
        }

        self.runtime
            .push()
            .disconnect_connection(&handle.client_id, handle.connection, CANCELLED_REASON);
        tracing::info!(
            session_id = %session_id,
            work_id = %handle.work_id,
            "[SessionController] work cancelled"
        );
        Ok(true)
    }

    /// Attach a fresh stream to the running Work without calling the model again.
    pub fn reconnect(&self, session_id: &str, client_id: Option<String>) -> AppResult<ChatStream> {
        let handle = self
            .runtime
            .works()
            .get_work(session_id)
            .filter(WorkHandle::is_running)
            .ok_or_else(|| AppError::not_found("no running task"))?;

        let client_id = client_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(handle.client_id);
        let (connection, frames) = self.runtime.push().register(&client_id);
        self.runtime.works().rebind_client(session_id, &client_id, connection);

        tracing::info!(
            session_id = %session_id,
            client_id = %client_id,
            "[SessionController] client reconnected"
        );
        Ok(ChatStream {
            work_id: handle.work_id,
            client_id,
            frames,
        })
    }

    pub fn connected_clients(&self) -> usize {
        self.runtime.push().client_count()
    }

    pub fn running_works(&self) -> usize {
        self.runtime.works().len()
    }
}
