//! Tool registry and the fixed task-tool catalog.

pub mod errors;
mod tasks;

pub use errors::ToolError;
pub use tasks::TaskTools;

use crate::model::ToolSpec;
use auth::Principal;
use serde_json::Value;
use std::future::Future;

/// The fixed catalog of operations the model may request.
///
/// This is the boundary between the model loop and side effects: dispatch
/// validates the tool name and arguments, then runs the implementation with
/// the caller's principal injected server-side. The principal is never part
/// of any tool's declared schema.
pub trait ToolRegistry: Send + Sync {
    /// Declared tool specifications, sent verbatim to the model.
    fn specs(&self) -> &[ToolSpec];

    /// Execute a tool call, returning a prose summary for the model to read.
    fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        principal: &Principal,
    ) -> impl Future<Output = Result<String, ToolError>> + Send;
}
