//! HTTP routes: the chat endpoint and its auth gate.

use crate::error::ApiError;
use agent::{OpenAiBackend, Orchestrator, SessionId, SessionStore, TaskTools};
use auth::{Principal, Verifier};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Request bodies larger than this are rejected before any model call.
const MAX_MESSAGE_CHARS: usize = 1000;

/// Events buffered ahead of a slow client. A full queue applies backpressure
/// to the orchestrator without dropping events.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<OpenAiBackend, TaskTools>>,
    pub sessions: Arc<SessionStore>,
    pub verifier: Arc<Verifier>,
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .with_state(state)
}

/// Resolve the bearer credential to a principal, or reject with 401 before
/// any stream is opened.
async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("expected Bearer token".into()))?;

    let principal = state.verifier.verify(token).map_err(|e| {
        warn!(error = %e, "rejected credential");
        ApiError::Unauthorized(e.to_string())
    })?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// `POST /api/chat` — one user utterance in, an SSE event stream out.
async fn chat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::Validation("message must not be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::Validation(format!(
            "message exceeds {MAX_MESSAGE_CHARS} characters",
        )));
    }

    info!(principal = %principal, "chat request");

    // An unparseable session id is treated as absent: a fresh session.
    let session_id = body.session_id.as_deref().and_then(SessionId::parse);
    let session = state.sessions.get_or_create(&principal, session_id);

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.run(session, message, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
