//! In-memory conversation sessions.
//!
//! Sessions hold the bounded message history for one conversation. The first
//! message is always the system preamble and is never evicted; truncation
//! drops the oldest non-preamble messages and never separates an assistant
//! turn from the tool results that answer it.
//!
//! The store hands out each session behind its own async mutex: a second
//! request against the same session serializes behind the first, so the
//! history invariants hold without any client cooperation. Sessions expire
//! after an inactivity window and are swept lazily on store access.

use crate::model::ChatMessage;
use auth::Principal;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied session id. Unparseable ids are treated as
    /// absent by callers, which yields a fresh session.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One conversation's state.
pub struct Session {
    pub id: SessionId,
    principal: Principal,
    messages: Vec<ChatMessage>,
    max_messages: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(principal: Principal, preamble: &str, max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            principal,
            messages: vec![ChatMessage::system(preamble)],
            max_messages,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append a message and mark the session active.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Enforce the history cap.
    ///
    /// Must only be called at round boundaries, when every assistant turn in
    /// the history already has its tool results appended — dropping an
    /// assistant message takes its results with it, and the history never
    /// starts with a dangling tool result.
    pub fn compact(&mut self) {
        while self.messages.len() > self.max_messages && self.messages.len() > 1 {
            self.messages.remove(1);
            while matches!(self.messages.get(1), Some(ChatMessage::Tool { .. })) {
                self.messages.remove(1);
            }
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.last_activity > ttl
    }
}

struct Entry {
    principal: Principal,
    session: Arc<Mutex<Session>>,
}

/// Process-scoped session table.
pub struct SessionStore {
    sessions: StdMutex<HashMap<SessionId, Entry>>,
    preamble: String,
    max_messages: usize,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store with the given system preamble, history cap, and
    /// inactivity window.
    pub fn new(preamble: impl Into<String>, max_messages: usize, ttl: Duration) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            preamble: preamble.into(),
            // Room for the preamble plus at least one full round.
            max_messages: max_messages.max(4),
            ttl,
        }
    }

    /// Fetch the caller's session, or create one.
    ///
    /// A missing id, an unknown id, or an id owned by a different principal
    /// all yield a brand-new session — a caller can never attach to another
    /// principal's conversation.
    pub fn get_or_create(
        &self,
        principal: &Principal,
        id: Option<SessionId>,
    ) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut sessions, self.ttl);

        if let Some(id) = id
            && let Some(entry) = sessions.get(&id)
            && entry.principal == *principal
        {
            return Arc::clone(&entry.session);
        }

        let session = Session::new(principal.clone(), &self.preamble, self.max_messages);
        let id = session.id;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(
            id,
            Entry {
                principal: principal.clone(),
                session: Arc::clone(&session),
            },
        );
        session
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A session locked by an in-flight request is by definition active, so
    // try_lock skipping it is correct.
    fn sweep(sessions: &mut HashMap<SessionId, Entry>, ttl: Duration) {
        sessions.retain(|_, entry| match entry.session.try_lock() {
            Ok(session) => !session.is_expired(ttl),
            Err(_) => true,
        });
    }
}
