//! Model Fallback Service
//!
//! Tries configured models in priority order when a call fails.

mod chain;

pub use chain::{
    FailureReason, FallbackAttempt, FallbackError, FallbackExecutionLog, FallbackResult,
    ModelFallbackChain,
};
