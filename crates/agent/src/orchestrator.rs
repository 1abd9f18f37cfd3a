//! The agent loop.
//!
//! One run handles one user utterance: append it to the session, then
//! repeatedly stream a model turn, forward text as it arrives, reconstruct
//! any tool calls, execute them in emission order with the session's
//! principal injected, and feed the results back — until the model produces
//! a call-free turn or the round cap is hit.
//!
//! Failures split two ways. Anything the model caused (unknown tool, bad
//! arguments, not-found, ambiguity, timeout) becomes tool-result text the
//! model can react to on its next turn. Anything infrastructural (the model
//! unreachable mid-stream) terminates the stream with one `error` event
//! followed by `done`.

use crate::accumulator::TurnAccumulator;
use crate::events::{StreamEvent, ToolCallEvent};
use crate::model::{Backend, ChatMessage, ModelError, ModelRequest};
use crate::session::Session;
use crate::tools::{ToolError, ToolRegistry};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const ROUND_CAP_MESSAGE: &str =
    "I wasn't able to finish handling that request. Please try rephrasing it.";

/// Tuning knobs for the loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum model rounds per user utterance.
    pub max_rounds: usize,
    /// Per-tool-call execution timeout.
    pub tool_timeout: Duration,
    /// Extra attempts when opening the model stream fails transiently.
    pub connect_retries: u32,
    /// Maximum wait for the next fragment of an open model stream. A model
    /// that goes silent past this is a stream-fatal failure, not a hang.
    pub stream_idle_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            tool_timeout: Duration::from_secs(10),
            connect_retries: 1,
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Drives conversations: the only writer of session history.
pub struct Orchestrator<B, T> {
    backend: B,
    tools: T,
    config: OrchestratorConfig,
}

impl<B: Backend, T: ToolRegistry> Orchestrator<B, T> {
    pub fn new(backend: B, tools: T) -> Self {
        Self::with_config(backend, tools, OrchestratorConfig::default())
    }

    pub fn with_config(backend: B, tools: T, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }

    /// Handle one user utterance, emitting stream events on `tx`.
    ///
    /// Locks the session for the whole run: a concurrent request against the
    /// same session serializes behind this one. Always ends the stream with
    /// a terminal event (`done`, or `error` then `done`).
    pub async fn run(
        &self,
        session: Arc<Mutex<Session>>,
        user_message: String,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut session = session.lock().await;
        let session_id = session.id;

        session.push(ChatMessage::user(user_message));
        session.compact();

        // The first event carries the session id; later events belong to the
        // same stream.
        let _ = tx.send(StreamEvent::opening(session_id.to_string())).await;

        for round in 0..self.config.max_rounds {
            let mut stream = match self.open_stream(&session).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(session = %session_id, round, error = %e, "model call failed");
                    let _ = tx.send(StreamEvent::error(e.to_string())).await;
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
            };

            let mut accumulator = TurnAccumulator::new();
            let mut stream_failure: Option<ModelError> = None;

            loop {
                let fragment = match tokio::time::timeout(
                    self.config.stream_idle_timeout,
                    stream.next(),
                )
                .await
                {
                    Ok(Some(fragment)) => fragment,
                    Ok(None) => break,
                    Err(_) => {
                        stream_failure = Some(ModelError::Network(format!(
                            "model stream produced no data for {}s",
                            self.config.stream_idle_timeout.as_secs(),
                        )));
                        break;
                    }
                };
                match fragment {
                    Ok(fragment) => {
                        if let crate::model::StreamFragment::TextDelta(text) = &fragment {
                            let _ = tx.send(StreamEvent::content(text.clone())).await;
                        }
                        accumulator.apply(&fragment);
                    }
                    Err(e) => {
                        stream_failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = stream_failure {
                error!(session = %session_id, round, error = %e, "model stream failed");
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }

            let turn = accumulator.finish();
            info!(
                session = %session_id,
                round,
                tool_calls = turn.calls.len(),
                "model turn complete",
            );

            if turn.calls.is_empty() {
                session.push(ChatMessage::assistant(turn.text, Vec::new()));
                session.compact();
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }

            session.push(ChatMessage::assistant(turn.text, turn.calls.clone()));

            // Strictly in emission order: later calls may depend on the
            // effects of earlier ones.
            for call in &turn.calls {
                let _ = tx
                    .send(StreamEvent::ToolCall {
                        tool_call: ToolCallEvent::from(call),
                    })
                    .await;

                let principal = session.principal().clone();
                let result = tokio::time::timeout(
                    self.config.tool_timeout,
                    self.tools
                        .dispatch(&call.name, call.arguments.clone(), &principal),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(ToolError::Timeout(
                        self.config.tool_timeout.as_millis() as u64
                    ))
                });

                let content = match result {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(session = %session_id, tool = %call.name, error = %e, "tool failed");
                        format!("Tool error: {e}")
                    }
                };

                session.push(ChatMessage::tool(call.id.clone(), content));
            }
            session.compact();

            // After a disconnect, tools already dispatched have completed
            // above, but no further model rounds are started.
            if tx.is_closed() {
                info!(session = %session_id, round, "client disconnected; stopping");
                return;
            }
        }

        warn!(session = %session_id, "round cap exceeded");
        let _ = tx.send(StreamEvent::content(ROUND_CAP_MESSAGE)).await;
        let _ = tx.send(StreamEvent::Done).await;
    }

    async fn open_stream(
        &self,
        session: &Session,
    ) -> Result<crate::model::FragmentStream, ModelError> {
        let mut attempts = 0;
        loop {
            let request = ModelRequest {
                messages: session.messages(),
                tools: self.tools.specs(),
            };
            match self.backend.stream_turn(request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_transient() && attempts < self.config.connect_retries => {
                    attempts += 1;
                    warn!(error = %e, attempt = attempts, "transient model error; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
