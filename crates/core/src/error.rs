//! Core Error Types
//!
//! Errors raised by the shared crates themselves: rejected agent settings
//! and undecodable JSON payloads. Store, conflict and model failures live in
//! the application error type, which wraps this one.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting that cannot be used to run the agent, such as a marker
    /// tag that collides with the action vocabulary
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the error came from caller-supplied input rather than a
    /// payload produced inside the runtime.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
