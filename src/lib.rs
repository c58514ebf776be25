//! Autoprovider - Agent Execution Core
//!
//! Backend of the autoprovider chat agent. It includes:
//! - HTTP routes that start, stream, reconnect to and terminate agent Works
//! - The agent loop: context assembly, model fallback, tag parsing and
//!   ordered tool dispatch
//! - Dialogue persistence behind the `DialogueStore` trait
//! - Configuration models and the shared error type

pub mod commands;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use commands::router;
pub use models::config::AppConfig;
pub use models::response::*;
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
