//! OpenAI-compatible streaming backend.
//!
//! Speaks the chat-completions wire protocol with `stream: true`: the
//! response body is a server-sent event stream whose `data:` payloads carry
//! chunk deltas. Text arrives as content deltas; tool calls arrive as
//! index-keyed deltas whose id/name/arguments fragments the caller must
//! accumulate.

use crate::model::{
    Backend, ChatMessage, FragmentStream, ModelError, ModelRequest, StreamFragment, ToolSpec,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Transport-level cap on silence between response bytes. An open stream
/// that stops sending must fail rather than hold the turn forever.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    /// The chat-completions wire format carries arguments as a JSON string.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiChunk {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    delta: ApiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ApiFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at an alternative chat-completions endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .read_timeout(READ_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn builder(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(api_key, model)
    }

    fn message_to_api(message: &ChatMessage) -> ApiMessage {
        match message {
            ChatMessage::System { content } => ApiMessage {
                role: "system",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::User { content } => ApiMessage {
                role: "user",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => ApiMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|call| ApiToolCall {
                                id: call.id.clone(),
                                kind: "function",
                                function: ApiFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => ApiMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool {
        ApiTool {
            kind: "function",
            function: ApiFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.schema.clone(),
            },
        }
    }
}

impl Backend for OpenAiBackend {
    async fn stream_turn(&self, request: ModelRequest<'_>) -> Result<FragmentStream, ModelError> {
        let api_request = ApiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(Self::message_to_api).collect(),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
            tool_choice: if request.tools.is_empty() {
                None
            } else {
                Some("auto")
            },
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_fragments(response, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Read the SSE body and push decoded fragments until `[DONE]` or error.
async fn pump_fragments(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<StreamFragment, ModelError>>,
) {
    let mut body = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(ModelError::Network(e.to_string()))).await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                return;
            }

            let chunk: ApiChunk = match serde_json::from_str(payload) {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx
                        .send(Err(ModelError::InvalidResponse(e.to_string())))
                        .await;
                    return;
                }
            };

            for fragment in chunk_to_fragments(chunk) {
                if tx.send(Ok(fragment)).await.is_err() {
                    // Consumer gone; stop reading.
                    return;
                }
            }
        }
    }
}

fn chunk_to_fragments(chunk: ApiChunk) -> Vec<StreamFragment> {
    let mut fragments = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            fragments.push(StreamFragment::TextDelta(content));
        }
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let function = delta.function.unwrap_or_default();
            fragments.push(StreamFragment::ToolCallDelta {
                index: delta.index,
                id: delta.id,
                name: function.name,
                arguments: function.arguments,
            });
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCall;
    use serde_json::json;

    #[test]
    fn chunk_decoding() {
        let chunk: ApiChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Hi","tool_calls":[
                {"index":0,"id":"call_1","function":{"name":"create_task","arguments":"{\"ti"}}
            ]}}]}"#,
        )
        .unwrap();
        let fragments = chunk_to_fragments(chunk);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], StreamFragment::TextDelta("Hi".into()));
        assert_eq!(
            fragments[1],
            StreamFragment::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("create_task".into()),
                arguments: Some("{\"ti".into()),
            },
        );
    }

    #[test]
    fn assistant_tool_calls_serialized_as_strings() {
        let message = ChatMessage::assistant(
            None,
            vec![ToolCall {
                id: "call_1".into(),
                name: "create_task".into(),
                arguments: json!({"title": "x"}),
            }],
        );
        let api = OpenAiBackend::message_to_api(&message);
        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{\"title\":\"x\"}");
        assert!(value.get("content").is_none());
    }

    #[test]
    fn tool_message_carries_call_id() {
        let api = OpenAiBackend::message_to_api(&ChatMessage::tool("call_9", "done"));
        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_9");
    }
}
