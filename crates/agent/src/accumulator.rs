//! Reassembly of streamed model turns.
//!
//! The remote model emits a turn as interleaved text and tool-call deltas.
//! Tool-call deltas are keyed by a positional index, and a single call's
//! `id`, `name`, and `arguments` string may each arrive split across many
//! deltas. Fragments are only concatenated here; the accumulated arguments
//! are parsed exactly once, when the turn closes.

use crate::model::{StreamFragment, ToolCall};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates the fragments of one model turn.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
}

/// A completed model turn.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Narrated text, if any.
    pub text: Option<String>,
    /// Fully reconstructed tool calls, in emission order.
    pub calls: Vec<ToolCall>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment.
    pub fn apply(&mut self, fragment: &StreamFragment) {
        match fragment {
            StreamFragment::TextDelta(delta) => self.text.push_str(delta),
            StreamFragment::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.calls.entry(*index).or_default();
                if let Some(id) = id {
                    call.id.push_str(id);
                }
                if let Some(name) = name {
                    call.name.push_str(name);
                }
                if let Some(arguments) = arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }
    }

    /// Close the turn and parse each call's accumulated arguments.
    pub fn finish(self) -> Turn {
        let text = if self.text.is_empty() {
            None
        } else {
            Some(self.text)
        };

        let calls = self
            .calls
            .into_values()
            .map(|call| {
                let arguments = if call.arguments.is_empty() {
                    Value::Object(Default::default())
                } else {
                    // An unparseable buffer is kept as the raw string so
                    // dispatch rejects the call as invalid arguments instead
                    // of the round crashing.
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(Value::String(call.arguments))
                };
                ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }
            })
            .collect();

        Turn { text, calls }
    }
}
