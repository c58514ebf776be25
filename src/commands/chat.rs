//! Chat Commands
//!
//! Start, reconnect to and terminate agent Works. Streams are rendered from
//! the push registry's frames as server-sent events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;

use autoprovider_core::PushFrame;

use crate::models::response::ApiResponse;
use crate::services::session::{ChatRequest, ChatStream};
use crate::state::AppState;
use crate::utils::error::AppError;

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/api/agent/chat", post(start_chat))
        .route("/api/agent/sessions/{session_id}/reconnect", get(reconnect))
        .route("/api/agent/sessions/{session_id}/terminate", post(terminate))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconnectQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Start a Work and stream its frames
pub async fn start_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = state.controller.start_chat(request).await?;
    Ok(into_sse(stream))
}

/// Reattach to the running Work of a session
pub async fn reconnect(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ReconnectQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = state.controller.reconnect(&session_id, query.client_id)?;
    Ok(into_sse(stream))
}

/// Stop the running Work of a session
pub async fn terminate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let message = if state.controller.cancel(&session_id).await? {
        "task stopped"
    } else {
        "no running task"
    };
    Ok(Json(ApiResponse::message(message)))
}

fn into_sse(stream: ChatStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = UnboundedReceiverStream::new(stream.frames).map(|frame| Ok(frame_to_event(frame)));
    Sse::new(events)
}

/// Render one push frame as a server-sent event.
pub fn frame_to_event(frame: PushFrame) -> Event {
    match frame {
        // SSE data lines cannot carry carriage returns
        PushFrame::Event { event, data } => Event::default().event(event).data(data.replace('\r', "")),
        PushFrame::Heartbeat { timestamp } => Event::default().comment(format!("heartbeat {}", timestamp)),
        PushFrame::Retry { millis } => Event::default().retry(Duration::from_millis(millis)),
    }
}
