//! Session Context
//!
//! The execution context handed to every tool invocation, plus the stop flag
//! shared between a running Work, its dispatch lane and the cancellation path.
//!
//! 1. `SessionContext` - Identity of the Work a tool runs for
//! 2. `StopFlag` - Cooperative cancellation signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// SessionContext
// ============================================================================

/// Concrete context for one Work inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub work_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        work_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            work_id: work_id.into(),
            project_id: project_id.into(),
            client_id: None,
        }
    }

    /// Bind the push-stream client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

// ============================================================================
// StopFlag
// ============================================================================

/// Shared, clonable cancellation flag.
///
/// All clones observe the same value. Once set it is never cleared; a new
/// Work gets a new flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the owning Work as stopped.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
