use ptymux_session::SessionManager;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the one session manager of the server
pub type SharedSessions = Arc<Mutex<SessionManager>>;

/// Per-call execution context handed to every tool.
/// Tools reach the session manager only through this.
#[derive(Clone)]
pub struct ToolContext {
    pub sessions: SharedSessions,
    pub call_id: String,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    pub fn new(sessions: SharedSessions) -> Self {
        Self {
            sessions,
            call_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn from_manager(manager: SessionManager) -> Self {
        Self::new(Arc::new(Mutex::new(manager)))
    }

    /// Same sessions, fresh call id
    pub fn for_call(&self) -> Self {
        Self::new(Arc::clone(&self.sessions))
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}
