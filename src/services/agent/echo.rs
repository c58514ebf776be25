//! Work Push Sink
//!
//! Sends frames of one Work to whichever client currently watches it. The
//! binding is looked up on every send so a reconnect that rebinds the Work is
//! picked up mid-round. Once the Work is no longer registered, or a newer
//! Work took the session, frames go to the connection the Work last knew,
//! which a newer stream under the same client id never matches.

use std::sync::Arc;

use serde_json::Value;

use autoprovider_core::{PushFrame, ToolOutcome};
use autoprovider_tools::{Action, LaneObserver};

use crate::services::session::{ConnectionId, PushRegistry, SendOutcome, WorkHandle, WorkRegistry};

/// Parameter keys shown in an operation echo, first match wins.
const ECHO_KEYS: &[&str] = &["fileName", "path", "searchContent", "bash", "sql", "todolistName"];

#[derive(Clone)]
pub struct WorkSink {
    push: Arc<PushRegistry>,
    works: Arc<WorkRegistry>,
    session_id: String,
    work_id: String,
    client_id: String,
    connection: ConnectionId,
}

impl WorkSink {
    pub fn new(
        push: Arc<PushRegistry>,
        works: Arc<WorkRegistry>,
        session_id: impl Into<String>,
        handle: &WorkHandle,
    ) -> Self {
        Self {
            push,
            works,
            session_id: session_id.into(),
            work_id: handle.work_id.clone(),
            client_id: handle.client_id.clone(),
            connection: handle.connection,
        }
    }

    /// Client id and connection bound to this Work right now.
    pub fn target(&self) -> (String, ConnectionId) {
        self.works
            .get_work(&self.session_id)
            .filter(|w| w.work_id == self.work_id)
            .map(|w| (w.client_id, w.connection))
            .unwrap_or_else(|| (self.client_id.clone(), self.connection))
    }

    pub fn send(&self, frame: PushFrame) -> SendOutcome {
        let (client_id, connection) = self.target();
        self.push.send(frame, &client_id, connection)
    }

    /// Close the bound stream with `reason`.
    pub fn disconnect(&self, reason: &str) -> SendOutcome {
        let (client_id, connection) = self.target();
        self.push.disconnect_connection(&client_id, connection, reason)
    }
}

impl LaneObserver for WorkSink {
    fn on_start(&self, action: &Action, _index: usize) {
        self.send(PushFrame::operation(&action.name, &echo_content(action)));
    }

    fn on_complete(&self, action: &Action, outcome: &ToolOutcome, index: usize) {
        if !outcome.is_success() {
            tracing::warn!(
                work_id = %self.work_id,
                action = %action.name,
                index,
                "[AgentWork] tool failed: {}",
                outcome.message
            );
            self.send(PushFrame::error(&format!("{}: {}", action.name, outcome.message)));
        }
    }
}

/// Short description of an action for its echo element.
fn echo_content(action: &Action) -> String {
    let Value::Object(params) = &action.parameters else {
        return action.name.clone();
    };
    ECHO_KEYS
        .iter()
        .find_map(|key| match params.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        })
        .unwrap_or_else(|| action.name.clone())
}
