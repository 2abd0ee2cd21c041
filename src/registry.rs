// Session registry: id to live handle, auto-creating on first contact

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::session::{spawn_session, SessionDeps, SessionHandle};
use crate::types::SessionInfo;

struct SessionEntry {
    handle: SessionHandle,
    info: SessionInfo,
}

/// Shared map of running sessions. Dropping an entry drops the last command
/// sender, which ends the session task.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            deps,
        }
    }

    /// Handle for the given id, spawning the session if this is the first
    /// contact. Touches last_active either way.
    pub async fn ensure(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.info.last_active = now;
            return entry.handle.clone();
        }

        let handle = spawn_session(session_id.to_string(), self.deps.clone());
        let info = SessionInfo {
            id: session_id.to_string(),
            title: format!("Audit {}", now.format("%m/%d %H:%M")),
            created_at: now,
            last_active: now,
        };
        tracing::info!(session_id = %session_id, "session spawned");
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                handle: handle.clone(),
                info,
            },
        );
        handle
    }

    /// Explicitly create a session. Reuses an existing id rather than
    /// replacing the running task.
    pub async fn create(
        &self,
        session_id: Option<String>,
        title: Option<String>,
        first_message: Option<String>,
    ) -> SessionInfo {
        let id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        if let Some(entry) = sessions.get_mut(&id) {
            entry.info.last_active = now;
            return entry.info.clone();
        }

        let handle = spawn_session(id.clone(), self.deps.clone());
        let info = SessionInfo {
            id: id.clone(),
            title: derive_title(title, first_message),
            created_at: now,
            last_active: now,
        };
        tracing::info!(session_id = %id, "session created");
        sessions.insert(
            id,
            SessionEntry {
                handle,
                info: info.clone(),
            },
        );
        info
    }

    /// All sessions, most recently active first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        infos
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::info!(session_id = %session_id, "session deleted");
        }
        removed
    }
}

/// Listing title: an explicit title wins, then a trimmed lead of the first
/// message, then a plain timestamp label.
fn derive_title(title: Option<String>, first_message: Option<String>) -> String {
    let stamp = Utc::now().format("%m/%d %H:%M");

    if let Some(title) = title {
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }

    if let Some(message) = first_message {
        let message = message.trim();
        if !message.is_empty() {
            let lead = if message.chars().count() > 40 {
                let head: String = message.chars().take(37).collect();
                format!("{}...", head)
            } else {
                message.to_string()
            };
            return format!("{} • {}", lead, stamp);
        }
    }

    format!("Audit {}", stamp)
}
