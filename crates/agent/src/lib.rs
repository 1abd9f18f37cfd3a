//! TaskFlow agent core — the conversational tool-execution loop.
//!
//! This crate contains everything between the HTTP surface and the record
//! store:
//!
//! - **Model protocol** ([`model`]): conversation messages, tool
//!   declarations, streamed response fragments, and the [`Backend`] trait
//!   abstracting the remote model.
//! - **Providers** ([`providers`]): the OpenAI-compatible streaming backend.
//! - **Turn accumulation** ([`TurnAccumulator`]): reassembles tool calls
//!   whose name and arguments arrive fragmented across many deltas.
//! - **Tool registry** ([`tools`]): the fixed catalog of task operations the
//!   model may request, dispatched with the caller's principal injected
//!   server-side.
//! - **Sessions** ([`session`]): bounded in-memory conversation history with
//!   a pinned system preamble and lazy expiry.
//! - **Orchestrator** ([`Orchestrator`]): the bounded agent loop driving
//!   model rounds and tool execution, emitting [`StreamEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use agent::{Orchestrator, OpenAiBackend, SessionStore, TaskTools};
//!
//! let backend = OpenAiBackend::builder(api_key, "gpt-4o-mini").build();
//! let tools = TaskTools::new(task_store);
//! let orchestrator = Orchestrator::new(backend, tools);
//!
//! let session = sessions.get_or_create(&principal, None);
//! orchestrator.run(session, "Add a task to call the dentist".into(), tx).await;
//! ```

mod accumulator;
mod events;
pub mod model;
mod orchestrator;
pub mod providers;
pub mod session;
pub mod tools;

pub use accumulator::{Turn, TurnAccumulator};
pub use events::{StreamEvent, ToolCallEvent};
pub use model::{Backend, ChatMessage, FragmentStream, ModelError, ModelRequest, StreamFragment, ToolCall, ToolSpec};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use providers::OpenAiBackend;
pub use session::{Session, SessionId, SessionStore};
pub use tools::{TaskTools, ToolError, ToolRegistry};
