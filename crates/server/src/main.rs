//! taskflow — a conversational task-management server.
//!
//! Exposes a single authenticated endpoint, `POST /api/chat`, that feeds the
//! user's message through the agent loop and streams the result back as
//! server-sent events.

mod config;
mod error;
mod routes;

use agent::{Orchestrator, OrchestratorConfig, OpenAiBackend, SessionStore, TaskTools};
use auth::Verifier;
use clap::Parser;
use config::Config;
use routes::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::TaskStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SYSTEM_PROMPT: &str = "\
You are TaskFlow, a task management assistant.

You help users manage their tasks through natural conversation. You MUST use \
your available tools to perform actions. Do not just say you will do \
something; actually call the tool to do it.

Available tools:
- create_task: add a new task. Extract the title from what the user says.
- list_tasks: show the user's tasks, optionally filtered by status or priority.
- update_task: change task details like title, description, priority, or status.
- delete_task: remove a task the user no longer needs.
- complete_task: mark a task done when the user says they finished it.

Guidelines:
1. Always use the appropriate tool when the user asks to add, view, update, \
delete, or complete tasks.
2. When adding a task, extract the title and any details (priority, due date) \
mentioned.
3. Priority mapping: \"urgent\", \"important\", \"asap\" mean HIGH; normal \
requests are MEDIUM; \"when you can\" or \"low priority\" mean LOW.
4. If a request is ambiguous, ask for clarification before acting.
5. Keep responses concise but informative.";

#[derive(Parser)]
#[command(name = "taskflow", about = "Conversational task-management server")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "taskflow.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    let api_key = config.api_key()?;
    let jwt_secret = config.jwt_secret()?;

    let store = Arc::new(TaskStore::open(&config.storage.db_path)?);
    info!(path = %config.storage.db_path, "opened task store");

    let mut backend = OpenAiBackend::builder(api_key, config.model.model.clone());
    if let Some(base_url) = &config.model.base_url {
        backend = backend.base_url(base_url.clone());
    }

    let orchestrator = Arc::new(Orchestrator::with_config(
        backend.build(),
        TaskTools::new(Arc::clone(&store)),
        OrchestratorConfig {
            max_rounds: config.agent.max_rounds,
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
            ..OrchestratorConfig::default()
        },
    ));

    let sessions = Arc::new(SessionStore::new(
        SYSTEM_PROMPT,
        config.session.max_messages,
        chrono::Duration::hours(config.session.ttl_hours),
    ));

    let state = AppState {
        orchestrator,
        sessions,
        verifier: Arc::new(Verifier::new(&jwt_secret)),
    };

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, model = %config.model.model, "serving");
    axum::serve(listener, app).await?;
    Ok(())
}
