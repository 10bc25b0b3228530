//! Bounded, file-backed store of chat sessions.
//!
//! Every mutation runs under one lock and is followed by a full snapshot of
//! the store (see [`persist`]). Snapshot failures are logged and never undo
//! the in-memory change.

pub mod persist;
pub mod session;

pub use session::{History, Message, Role, Session, SessionSummary, Turn};

use crate::config::MemoryConfig;
use persist::SessionMap;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared session store. Construct once and hand out behind an `Arc`.
///
/// Snapshots are written synchronously while the lock is held, so a reader
/// never observes a state newer than the file it could recover from.
pub struct SessionStore {
    sessions: Mutex<SessionMap>,
    path: PathBuf,
    max_sessions: usize,
    max_history: usize,
    auto_save: bool,
}

impl SessionStore {
    /// Open the store, loading the snapshot file if there is a usable one.
    pub fn open(config: &MemoryConfig) -> Self {
        let path = config.memory_file.clone();
        let sessions = match persist::load(&path) {
            Ok(Some(sessions)) => {
                info!("Loaded {} chat sessions from {}", sessions.len(), path.display());
                sessions
            }
            Ok(None) => {
                info!("No chat history at {}, starting empty", path.display());
                SessionMap::new()
            }
            Err(e) => {
                warn!("Failed to load chat history: {}", e);
                SessionMap::new()
            }
        };

        Self {
            sessions: Mutex::new(sessions),
            path,
            max_sessions: config.max_sessions.max(1),
            max_history: config.max_history_per_session,
            auto_save: config.auto_save,
        }
    }

    /// Allocate a new session, evicting the least recently active one if full.
    pub async fn create(&self) -> String {
        let mut sessions = self.sessions.lock().await;
        let id = self.insert_new(&mut sessions);
        self.save(&sessions);
        id
    }

    /// Append a message, creating a session if `id` is unknown.
    ///
    /// Returns the id the message was actually stored under.
    pub async fn append(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
        context: Option<Value>,
    ) -> String {
        let mut sessions = self.sessions.lock().await;
        let id = if sessions.contains_key(id) {
            id.to_string()
        } else {
            debug!("Unknown session {}, creating a new one", id);
            self.insert_new(&mut sessions)
        };

        if let Some(session) = sessions.get_mut(&id) {
            session.touch();
            session.messages.push(Message::new(role, content));
            if let Some(context) = context.filter(|c| !c.is_null()) {
                session.context = Some(context);
            }
            session.trim_to(self.max_history);
        }

        self.save(&sessions);
        id
    }

    /// Full message list and context of a session, refreshing its activity.
    pub async fn history(&self, id: &str) -> Option<History> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id)?;
        session.touch();
        let history = History {
            messages: session.messages.clone(),
            context: session.context.clone(),
        };
        self.save(&sessions);
        Some(history)
    }

    /// Like [`history`](Self::history), but reduced to `{role, content}` turns.
    pub async fn turns(&self, id: &str) -> Option<(Vec<Turn>, Option<Value>)> {
        let history = self.history(id).await?;
        let turns = history.messages.iter().map(Turn::from).collect();
        Some((turns, history.context))
    }

    /// Reset a session's messages and context. `false` if it does not exist.
    pub async fn clear(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        session.messages.clear();
        session.context = None;
        session.touch();
        self.save(&sessions);
        true
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .lock()
            .await
            .values()
            .map(Session::summary)
            .collect()
    }

    /// Write a snapshot now. Used on shutdown.
    pub async fn persist(&self) {
        let sessions = self.sessions.lock().await;
        self.save(&sessions);
    }

    fn insert_new(&self, sessions: &mut SessionMap) -> String {
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = oldest_session(sessions) else {
                break;
            };
            sessions.remove(&oldest);
            info!("Removed oldest session {} to make room", oldest);
        }

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(id.clone(), Session::new(id.clone()));
        debug!("Created session {}", id);
        id
    }

    fn save(&self, sessions: &SessionMap) {
        if !self.auto_save {
            return;
        }
        match persist::save(&self.path, sessions) {
            Ok(()) => debug!("Saved chat history to {}", self.path.display()),
            Err(e) => warn!("Failed to save chat history: {}", e),
        }
    }
}

/// Session with the smallest `last_active`; the first in key order wins ties.
fn oldest_session(sessions: &SessionMap) -> Option<String> {
    sessions
        .values()
        .min_by_key(|s| s.last_active)
        .map(|s| s.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_sessions: usize, max_history: usize) -> MemoryConfig {
        MemoryConfig {
            max_sessions,
            max_history_per_session: max_history,
            memory_file: dir.path().join("chat_memory.json"),
            auto_save: true,
        }
    }

    // Keeps `last_active` values distinct between steps.
    fn tick() {
        std::thread::sleep(Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_create_evicts_least_recently_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 2, 20));

        let a = store.create().await;
        tick();
        let b = store.create().await;
        tick();
        let c = store.create().await;

        assert_eq!(store.len().await, 2);
        assert!(!store.contains(&a).await);
        assert!(store.contains(&b).await);
        assert!(store.contains(&c).await);
    }

    #[tokio::test]
    async fn test_eviction_follows_activity_not_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 2, 20));

        let a = store.create().await;
        tick();
        let b = store.create().await;
        tick();
        store.append(&a, Role::User, "still here", None).await;
        tick();
        store.create().await;

        assert!(store.contains(&a).await);
        assert!(!store.contains(&b).await);
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_creates_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 20));

        let id = store.append("missing", Role::User, "hello", None).await;
        assert_ne!(id, "missing");
        assert!(!store.contains("missing").await);

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].content, "hello");
        assert!(store.history("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_append_trims_oldest_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 3));
        let id = store.create().await;

        for i in 1..=5 {
            store.append(&id, Role::User, i.to_string(), None).await;
        }

        let history = store.history(&id).await.unwrap();
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_append_replaces_context_only_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 20));
        let id = store.create().await;

        store
            .append(&id, Role::Assistant, "a", Some(serde_json::json!([1, 2])))
            .await;
        store.append(&id, Role::User, "b", None).await;
        let (_, context) = store.turns(&id).await.unwrap();
        assert_eq!(context, Some(serde_json::json!([1, 2])));

        store
            .append(&id, Role::Assistant, "c", Some(serde_json::json!([9])))
            .await;
        let (turns, context) = store.turns(&id).await.unwrap();
        assert_eq!(context, Some(serde_json::json!([9])));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_history_refreshes_last_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 2, 20));

        let a = store.create().await;
        tick();
        let b = store.create().await;
        tick();
        store.history(&a).await.unwrap();
        tick();
        store.create().await;

        assert!(store.contains(&a).await);
        assert!(!store.contains(&b).await);
    }

    #[tokio::test]
    async fn test_clear_resets_messages_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 20));
        let id = store
            .append("new", Role::Assistant, "hi", Some(serde_json::json!([1])))
            .await;
        let created_at = store.sessions.lock().await[&id].created_at;

        tick();
        assert!(store.clear(&id).await);

        let sessions = store.sessions.lock().await;
        let session = &sessions[&id];
        assert!(session.messages.is_empty());
        assert!(session.context.is_none());
        assert_eq!(session.created_at, created_at);
        assert_eq!(session.id, id);
    }

    #[tokio::test]
    async fn test_clear_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 20));
        let id = store.create().await;
        let before = store.sessions.lock().await.clone();

        assert!(!store.clear("nope").await);
        assert_eq!(*store.sessions.lock().await, before);
        assert!(store.contains(&id).await);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 5, 20);
        let store = SessionStore::open(&cfg);
        let id = store.append("x", Role::User, "question", None).await;
        store
            .append(&id, Role::Assistant, "answer", Some(serde_json::json!([4, 5])))
            .await;
        store.create().await;
        let snapshot = store.sessions.lock().await.clone();

        let reopened = SessionStore::open(&cfg);
        assert_eq!(*reopened.sessions.lock().await, snapshot);
    }

    #[tokio::test]
    async fn test_open_with_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 5, 20);
        std::fs::write(&cfg.memory_file, "[oops").unwrap();

        let store = SessionStore::open(&cfg);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_change() {
        let dir = tempfile::tempdir().unwrap();
        // The parent "directory" is a regular file, so every save fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let cfg = MemoryConfig {
            memory_file: blocker.join("chat_memory.json"),
            ..config(&dir, 5, 20)
        };

        let store = SessionStore::open(&cfg);
        let id = store.append("x", Role::User, "kept", None).await;
        assert_eq!(store.history(&id).await.unwrap().messages[0].content, "kept");
    }

    #[tokio::test]
    async fn test_auto_save_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MemoryConfig {
            auto_save: false,
            ..config(&dir, 5, 20)
        };

        let store = SessionStore::open(&cfg);
        store.create().await;
        store.persist().await;
        assert!(!cfg.memory_file.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_respect_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 2, 20);
        let store = std::sync::Arc::new(SessionStore::open(&cfg));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let id = store.create().await;
                store
                    .append(&id, Role::User, format!("message {}", i), None)
                    .await;
                store.append("unknown", Role::User, "orphan", None).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(store.len().await <= 2);
        let on_disk = persist::load(&cfg.memory_file).unwrap().unwrap();
        assert!(on_disk.len() <= 2);
        assert!(!persist::temp_path(&cfg.memory_file).exists());
    }

    #[tokio::test]
    async fn test_list_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&config(&dir, 5, 20));
        let id = store.append("x", Role::User, "a".repeat(80), None).await;
        store.append(&id, Role::Assistant, "reply", None).await;

        let list = store.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].session_id, id);
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[0].preview, format!("{}...", "a".repeat(50)));
    }
}
