//! Wire-level stream events.
//!
//! Each event is one self-contained envelope serialized as a single JSON
//! object on the SSE stream, in emission order. The session id rides on the
//! first `content` event only; `done` is the terminal marker after which no
//! further events follow.

use crate::model::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation notice, with fully reconstructed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<&ToolCall> for ToolCallEvent {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// One event on the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A narrated text fragment.
    Content {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// A named operation is being invoked.
    ToolCall { tool_call: ToolCallEvent },
    /// Fatal, stream-terminating failure.
    Error { error: String },
    /// Terminal marker.
    Done,
}

impl StreamEvent {
    /// The stream's opening event, carrying the session id.
    pub fn opening(session_id: String) -> Self {
        Self::Content {
            content: String::new(),
            session_id: Some(session_id),
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
            session_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_event_json() {
        let event = StreamEvent::content("Hello");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "content", "content": "Hello"}),
        );
    }

    #[test]
    fn opening_event_carries_session_id() {
        let event = StreamEvent::opening("abc-123".into());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "content", "content": "", "session_id": "abc-123"}),
        );
    }

    #[test]
    fn tool_call_event_json() {
        let event = StreamEvent::ToolCall {
            tool_call: ToolCallEvent {
                id: "call_1".into(),
                name: "create_task".into(),
                arguments: json!({"title": "x"}),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool_call",
                "tool_call": {"id": "call_1", "name": "create_task", "arguments": {"title": "x"}},
            }),
        );
    }

    #[test]
    fn done_event_json() {
        assert_eq!(
            serde_json::to_value(StreamEvent::Done).unwrap(),
            json!({"type": "done"}),
        );
    }
}
