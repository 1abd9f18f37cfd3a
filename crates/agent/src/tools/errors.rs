use thiserror::Error;

/// Errors that can occur during tool dispatch.
///
/// None of these abort the round: the orchestrator feeds them back to the
/// model as tool-result text so it can correct itself or ask the user.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("execution failed: {0}")]
    Execution(String),
}
