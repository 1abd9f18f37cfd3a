use super::errors::ModelError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model, used to pair the call with
    /// its result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments as JSON.
    pub arguments: Value,
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    /// An assistant turn may narrate, request tools, or both.
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// The result of one tool call, immediately following the assistant turn
    /// that requested it.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// A tool declaration sent verbatim to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// An incremental fragment of a streamed model turn.
///
/// Text and tool-call fragments may interleave freely within one turn; a
/// tool call's `id`, `name`, and `arguments` may each arrive split across
/// several fragments, keyed by positional `index`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    /// A piece of narrated text.
    TextDelta(String),
    /// A piece of a tool call.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
}

/// Everything needed for a model request.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
}

/// The fragment stream for one model turn. The turn closes when the stream
/// ends.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, ModelError>> + Send>>;

/// Trait for remote model backends.
pub trait Backend: Send + Sync {
    /// Start one model turn and return its fragment stream.
    fn stream_turn(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<FragmentStream, ModelError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_serialization() {
        let msg = ChatMessage::assistant(
            Some("Creating it now.".into()),
            vec![ToolCall {
                id: "call_1".into(),
                name: "create_task".into(),
                arguments: json!({"title": "Call dentist"}),
            }],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["name"], "create_task");
    }

    #[test]
    fn call_free_assistant_omits_tool_calls() {
        let msg = ChatMessage::assistant(Some("Done!".into()), Vec::new());
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn tool_message_round_trip() {
        let msg = ChatMessage::tool("call_1", "Task created");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
