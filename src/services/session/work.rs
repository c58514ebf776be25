//! Work Registry
//!
//! Tracks the in-flight Work of every session: its id, the push-stream
//! connection it reports to, the shared stop flag and the abort handle for
//! the upstream model call.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use autoprovider_core::StopFlag;

use super::push::ConnectionId;

/// Handle to one running Work.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    pub work_id: String,
    pub project_id: String,
    pub client_id: String,
    /// Registration of `client_id` this Work reports to
    pub connection: ConnectionId,
    pub stop: StopFlag,
    pub abort: CancellationToken,
}

impl WorkHandle {
    pub fn new(
        work_id: impl Into<String>,
        project_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            work_id: work_id.into(),
            project_id: project_id.into(),
            client_id: client_id.into(),
            connection: ConnectionId::default(),
            stop: StopFlag::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_stopped()
    }

    /// Raise the stop flag and abort the upstream call.
    pub fn cancel(&self) {
        self.stop.stop();
        self.abort.cancel();
    }
}

/// Session id → running Work.
#[derive(Debug, Default)]
pub struct WorkRegistry {
    works: DashMap<String, WorkHandle>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `session_id`.
    ///
    /// Fails with the existing handle when the session already has a running
    /// Work. A stopped Work that has not been removed yet is replaced.
    pub fn add_work(&self, session_id: &str, handle: WorkHandle) -> Result<(), WorkHandle> {
        match self.works.entry(session_id.to_string()) {
            Entry::Occupied(existing) if existing.get().is_running() => Err(existing.get().clone()),
            Entry::Occupied(mut existing) => {
                existing.insert(handle);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    pub fn get_work(&self, session_id: &str) -> Option<WorkHandle> {
        self.works.get(session_id).map(|w| w.clone())
    }

    /// Remove the entry for `session_id` only if it still belongs to `work_id`.
    pub fn remove_work(&self, session_id: &str, work_id: &str) -> bool {
        self.works
            .remove_if(session_id, |_, w| w.work_id == work_id)
            .is_some()
    }

    /// Point the running Work of `session_id` at a new push-stream connection.
    pub fn rebind_client(
        &self,
        session_id: &str,
        client_id: &str,
        connection: ConnectionId,
    ) -> Option<WorkHandle> {
        let mut work = self.works.get_mut(session_id)?;
        work.client_id = client_id.to_string();
        work.connection = connection;
        Some(work.clone())
    }

    pub fn len(&self) -> usize {
        self.works.len()
    }

    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }
}
