//! HTTP Commands
//!
//! axum handlers for the agent surface. Chat and reconnect answer with a
//! server-sent event stream of push frames; the rest answer with JSON.

pub mod chat;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub use chat::{chat_routes, frame_to_event};
pub use health::health_routes;

/// Full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(chat_routes())
        .merge(health_routes())
        .with_state(state)
}
