//! End-to-end orchestrator tests against a scripted backend.

use agent::{
    Backend, ChatMessage, FragmentStream, ModelError, ModelRequest, Orchestrator,
    OrchestratorConfig, SessionStore, StreamEvent, StreamFragment, TaskTools, ToolRegistry,
};
use auth::Principal;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{NewTask, Status, TaskFilter, TaskStore};
use tokio::sync::mpsc;

const PREAMBLE: &str = "You are TaskFlow, a task management assistant.";

/// One scripted model turn.
enum Script {
    Turn(Vec<StreamFragment>),
    Fail(ModelError),
    /// Opens a stream that never yields a fragment.
    Stall,
}

/// Backend that replays scripted turns in order.
struct ScriptedBackend {
    turns: Mutex<VecDeque<Script>>,
}

impl ScriptedBackend {
    fn new(turns: Vec<Script>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }
}

impl Backend for ScriptedBackend {
    async fn stream_turn(&self, _request: ModelRequest<'_>) -> Result<FragmentStream, ModelError> {
        let next = self.turns.lock().unwrap().pop_front();
        match next {
            Some(Script::Turn(fragments)) => Ok(Box::pin(futures::stream::iter(
                fragments.into_iter().map(Ok),
            ))),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Stall) => Ok(Box::pin(futures::stream::pending())),
            None => Ok(Box::pin(futures::stream::iter(
                vec![Ok(StreamFragment::TextDelta("(script exhausted)".into()))],
            ))),
        }
    }
}

fn text(s: &str) -> StreamFragment {
    StreamFragment::TextDelta(s.into())
}

fn call_delta(
    index: u32,
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
) -> StreamFragment {
    StreamFragment::ToolCallDelta {
        index,
        id: id.map(Into::into),
        name: name.map(Into::into),
        arguments: arguments.map(Into::into),
    }
}

struct Harness {
    store: Arc<TaskStore>,
    sessions: SessionStore,
    orchestrator: Arc<Orchestrator<ScriptedBackend, TaskTools>>,
}

fn harness(script: Vec<Script>) -> Harness {
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let tools = TaskTools::new(Arc::clone(&store));
    let backend = ScriptedBackend::new(script);
    Harness {
        store,
        sessions: SessionStore::new(PREAMBLE, 21, ChronoDuration::hours(24)),
        orchestrator: Arc::new(Orchestrator::new(backend, tools)),
    }
}

async fn run(harness: &Harness, principal: &Principal, message: &str) -> Vec<StreamEvent> {
    let session = harness.sessions.get_or_create(principal, None);
    run_on(harness, session, message).await
}

async fn run_on(
    harness: &Harness,
    session: Arc<tokio::sync::Mutex<agent::Session>>,
    message: &str,
) -> Vec<StreamEvent> {
    let (tx, mut rx) = mpsc::channel(16);
    let orchestrator = Arc::clone(&harness.orchestrator);
    let message = message.to_string();
    let handle = tokio::spawn(async move {
        orchestrator.run(session, message, tx).await;
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();
    events
}

fn tool_call_events(events: &[StreamEvent]) -> Vec<&StreamEvent> {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolCall { .. }))
        .collect()
}

fn narration(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn create_task_scenario() {
    // Turn 1: narrate + one create_task call fragmented across deltas.
    // Turn 2: call-free confirmation.
    let harness = harness(vec![
        Script::Turn(vec![
            text("Adding that "),
            text("now."),
            call_delta(0, Some("call_1"), Some("create_"), None),
            call_delta(0, None, Some("task"), Some(r#"{"title":"Call the dentist","#)),
            call_delta(0, None, None, Some(r#""priority":"HIGH","due_date":"2026-08-26"}"#)),
        ]),
        Script::Turn(vec![text("Done — your task is in.")]),
    ]);
    let alice = Principal::new("alice");

    let events = run(&harness, &alice, "Add a task to call the dentist tomorrow, high priority")
        .await;

    // First event carries the session id.
    assert!(matches!(
        &events[0],
        StreamEvent::Content { session_id: Some(_), .. }
    ));

    let calls = tool_call_events(&events);
    assert_eq!(calls.len(), 1);
    let StreamEvent::ToolCall { tool_call } = calls[0] else {
        unreachable!()
    };
    assert_eq!(tool_call.name, "create_task");
    assert_eq!(tool_call.arguments["priority"], "HIGH");
    assert_eq!(tool_call.arguments["due_date"], "2026-08-26");

    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert!(narration(&events).contains("Done"));

    // And the record exists, owned by alice.
    let tasks = harness.store.list("alice", &TaskFilter::default()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Call the dentist");
}

#[tokio::test]
async fn list_tasks_scenario() {
    let harness = harness(vec![
        Script::Turn(vec![call_delta(
            0,
            Some("call_1"),
            Some("list_tasks"),
            Some(r#"{"status":"PENDING"}"#),
        )]),
        Script::Turn(vec![text("You have one pending task: pay rent.")]),
    ]);
    let alice = Principal::new("alice");
    harness.store.insert("alice", NewTask::new("Pay rent")).unwrap();

    let events = run(&harness, &alice, "Show me my pending tasks").await;

    let calls = tool_call_events(&events);
    assert_eq!(calls.len(), 1);
    let StreamEvent::ToolCall { tool_call } = calls[0] else {
        unreachable!()
    };
    assert_eq!(tool_call.name, "list_tasks");
    assert_eq!(tool_call.arguments["status"], "PENDING");
    assert!(narration(&events).contains("pending"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn ambiguous_completion_asks_for_clarification() {
    let harness = harness(vec![
        Script::Turn(vec![call_delta(
            0,
            Some("call_1"),
            Some("complete_task"),
            Some(r#"{"title_search":"dentist"}"#),
        )]),
        Script::Turn(vec![text("Which dentist task did you mean?")]),
    ]);
    let alice = Principal::new("alice");
    harness.store.insert("alice", NewTask::new("Call the dentist")).unwrap();
    harness.store.insert("alice", NewTask::new("dentist follow-up")).unwrap();

    let events = run(&harness, &alice, "Mark the dentist task complete").await;

    assert!(narration(&events).contains("Which dentist task"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    // No record was mutated.
    let tasks = harness.store.list("alice", &TaskFilter::default()).unwrap();
    assert!(tasks.iter().all(|t| t.status == Status::Pending));
}

#[tokio::test]
async fn upstream_failure_emits_error_then_done() {
    let harness = harness(vec![Script::Fail(ModelError::Api("503: unavailable".into()))]);
    let alice = Principal::new("alice");

    let events = run(&harness, &alice, "Add a task").await;

    assert!(tool_call_events(&events).is_empty());
    assert!(matches!(events[events.len() - 2], StreamEvent::Error { .. }));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert!(harness.store.list("alice", &TaskFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let harness = harness(vec![
        Script::Fail(ModelError::Network("connection reset".into())),
        Script::Turn(vec![text("Recovered.")]),
    ]);
    let alice = Principal::new("alice");

    let events = run(&harness, &alice, "Hello").await;

    assert!(narration(&events).contains("Recovered"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn round_cap_terminates_tool_happy_models() {
    // A model that requests a tool every turn, forever.
    let looping: Vec<Script> = (0..20)
        .map(|i| {
            Script::Turn(vec![call_delta(
                0,
                Some(&format!("call_{i}")),
                Some("list_tasks"),
                Some("{}"),
            )])
        })
        .collect();
    let harness = harness(looping);
    let alice = Principal::new("alice");

    let events = run(&harness, &alice, "Keep busy").await;

    // One tool call per round, capped at the default of 5.
    assert_eq!(tool_call_events(&events).len(), 5);
    assert!(narration(&events).contains("wasn't able to finish"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn unknown_tool_is_recoverable_within_the_conversation() {
    let harness = harness(vec![
        Script::Turn(vec![call_delta(
            0,
            Some("call_1"),
            Some("send_email"),
            Some("{}"),
        )]),
        Script::Turn(vec![text("Sorry, I can't send email.")]),
    ]);
    let alice = Principal::new("alice");

    let events = run(&harness, &alice, "Email my tasks to me").await;

    // The failure stayed inside the conversation: no error event.
    assert!(events.iter().all(|e| !matches!(e, StreamEvent::Error { .. })));
    assert!(narration(&events).contains("can't send email"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn history_keeps_assistant_and_results_paired() {
    let harness = harness(vec![
        Script::Turn(vec![
            text("Two at once."),
            call_delta(0, Some("call_a"), Some("create_task"), Some(r#"{"title":"First"}"#)),
            call_delta(1, Some("call_b"), Some("create_task"), Some(r#"{"title":"Second"}"#)),
        ]),
        Script::Turn(vec![text("Both created.")]),
    ]);
    let alice = Principal::new("alice");
    let session = harness.sessions.get_or_create(&alice, None);

    run_on(&harness, Arc::clone(&session), "Add two tasks").await;

    let session = session.lock().await;
    let messages = session.messages();

    // preamble, user, assistant(2 calls), tool, tool, assistant
    assert!(matches!(messages[0], ChatMessage::System { .. }));
    let assistant_at = messages
        .iter()
        .position(|m| matches!(m, ChatMessage::Assistant { tool_calls, .. } if !tool_calls.is_empty()))
        .unwrap();
    let ChatMessage::Assistant { tool_calls, .. } = &messages[assistant_at] else {
        unreachable!()
    };
    for (offset, call) in tool_calls.iter().enumerate() {
        let ChatMessage::Tool { tool_call_id, .. } = &messages[assistant_at + 1 + offset] else {
            panic!("expected tool result at {}", assistant_at + 1 + offset);
        };
        assert_eq!(tool_call_id, &call.id);
    }

    // Both tools actually ran, in emission order.
    let tasks = harness.store.search_title("alice", "").unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn stalled_model_stream_emits_error_then_done() {
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let tools = TaskTools::new(Arc::clone(&store));
    let orchestrator = Arc::new(Orchestrator::with_config(
        ScriptedBackend::new(vec![Script::Stall]),
        tools,
        OrchestratorConfig {
            stream_idle_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    ));
    let harness = Harness {
        store,
        sessions: SessionStore::new(PREAMBLE, 21, ChronoDuration::hours(24)),
        orchestrator,
    };
    let alice = Principal::new("alice");
    let session = harness.sessions.get_or_create(&alice, None);

    let events = run_on(&harness, Arc::clone(&session), "Anyone there?").await;

    // The stall becomes a terminal failure, not a hang.
    assert!(matches!(events[events.len() - 2], StreamEvent::Error { .. }));
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    // And the session is released for the next request.
    assert!(session.try_lock().is_ok());
}

#[tokio::test]
async fn concurrent_requests_serialize_on_the_session() {
    let harness = harness(vec![
        Script::Turn(vec![text("first reply")]),
        Script::Turn(vec![text("second reply")]),
    ]);
    let alice = Principal::new("alice");
    let session = harness.sessions.get_or_create(&alice, None);

    let spawn_run = |message: &str, tx: mpsc::Sender<StreamEvent>| {
        let orchestrator = Arc::clone(&harness.orchestrator);
        let session = Arc::clone(&session);
        let message = message.to_string();
        tokio::spawn(async move {
            orchestrator.run(session, message, tx).await;
        })
    };

    let (tx_a, mut rx_a) = mpsc::channel(16);
    let (tx_b, mut rx_b) = mpsc::channel(16);
    let a = spawn_run("first question", tx_a);
    let b = spawn_run("second question", tx_b);
    while rx_a.recv().await.is_some() {}
    while rx_b.recv().await.is_some() {}
    a.await.unwrap();
    b.await.unwrap();

    // The second run waited for the first: whole rounds never interleave.
    let session = session.lock().await;
    let messages = session.messages();
    assert_eq!(messages.len(), 5);
    assert!(matches!(messages[0], ChatMessage::System { .. }));
    for round in messages[1..].chunks(2) {
        assert!(matches!(round[0], ChatMessage::User { .. }));
        assert!(matches!(round[1], ChatMessage::Assistant { .. }));
    }
}

#[tokio::test]
async fn tool_registry_specs_reach_the_backend() {
    // Sanity: the registry declares the full catalog the orchestrator sends.
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let tools = TaskTools::new(store);
    let names: Vec<_> = tools.specs().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        ["create_task", "list_tasks", "update_task", "delete_task", "complete_task"],
    );
}

#[tokio::test]
async fn custom_round_cap_respected() {
    let looping: Vec<Script> = (0..10)
        .map(|_| Script::Turn(vec![call_delta(0, Some("c"), Some("list_tasks"), Some("{}"))]))
        .collect();
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let tools = TaskTools::new(Arc::clone(&store));
    let orchestrator = Arc::new(Orchestrator::with_config(
        ScriptedBackend::new(looping),
        tools,
        OrchestratorConfig {
            max_rounds: 2,
            ..Default::default()
        },
    ));
    let harness = Harness {
        store,
        sessions: SessionStore::new(PREAMBLE, 21, ChronoDuration::hours(24)),
        orchestrator,
    };

    let events = run(&harness, &Principal::new("alice"), "go").await;
    assert_eq!(tool_call_events(&events).len(), 2);
}
