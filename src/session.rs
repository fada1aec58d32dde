//! Conversation session store with idle expiry.
//!
//! Sessions are keyed by cryptographically random 128-bit ids (hex-encoded)
//! and hold a bounded history of user/assistant messages. A session idle for
//! longer than the configured timeout is removed by a background sweeper and
//! additionally refused on the read path, so a just-expired session never
//! satisfies a read between sweeps.

use crate::types::ChatMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Cadence of the background sweeper.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionRecord {
    history: Vec<ChatMessage>,
    #[allow(dead_code)]
    created_at: Instant,
    last_accessed: Instant,
}

struct Inner {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    timeout: Duration,
    max_history: usize,
}

impl Inner {
    fn expired(&self, record: &SessionRecord, now: Instant) -> bool {
        now.duration_since(record.last_accessed) >= self.timeout
    }
}

/// Keyed collection of conversation histories with idle TTL.
///
/// Shared across requests; all operations take `&self`. Dropping the store
/// stops its sweeper task.
pub struct SessionStore {
    inner: Arc<Inner>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl SessionStore {
    /// Create a store and start its sweeper task.
    pub fn new(timeout: Duration, max_history: usize) -> Self {
        let inner = Arc::new(Inner {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            max_history,
        });

        let sweeper = tokio::spawn(run_sweeper(Arc::downgrade(&inner)));

        Self { inner, sweeper }
    }

    /// Create a new session and return its id.
    ///
    /// Ids are 128 random bits hex-encoded; collisions are treated as
    /// impossible and not checked for.
    pub fn create(&self) -> String {
        let id = format!("{:032x}", rand::random::<u128>());
        let now = Instant::now();
        let mut sessions = self.inner.sessions.lock().expect("session lock poisoned");
        sessions.insert(
            id.clone(),
            SessionRecord {
                history: Vec::new(),
                created_at: now,
                last_accessed: now,
            },
        );
        id
    }

    /// Adopt a caller-provided session id: create an empty record under it
    /// if absent (or expired), touch it otherwise. Lets clients continue a
    /// conversation under an id they minted themselves.
    pub fn ensure(&self, id: &str) {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.lock().expect("session lock poisoned");
        if let Some(record) = sessions.get_mut(id) {
            if !self.inner.expired(record, now) {
                record.last_accessed = now;
                return;
            }
        }
        // Absent or expired: start fresh under the caller's id.
        sessions.insert(
            id.to_string(),
            SessionRecord {
                history: Vec::new(),
                created_at: now,
                last_accessed: now,
            },
        );
    }

    /// Return the history of a session, oldest first.
    ///
    /// Touches the session's last-accessed time. Unknown or expired ids
    /// return an empty history; an expired session is removed on the spot.
    pub fn history(&self, id: &str) -> Vec<ChatMessage> {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.lock().expect("session lock poisoned");
        if let Some(record) = sessions.get_mut(id) {
            if !self.inner.expired(record, now) {
                record.last_accessed = now;
                return record.history.clone();
            }
        }
        // Unknown, or expired; an expired record must not satisfy the read.
        sessions.remove(id);
        Vec::new()
    }

    /// Append a message to a session's history.
    ///
    /// A no-op for unknown or expired ids. After the append the history is
    /// trimmed to the most recent `max_history` entries.
    pub fn append(&self, id: &str, message: ChatMessage) {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.lock().expect("session lock poisoned");
        if let Some(record) = sessions.get_mut(id) {
            if !self.inner.expired(record, now) {
                record.last_accessed = now;
                record.history.push(message);
                let excess = record.history.len().saturating_sub(self.inner.max_history);
                if excess > 0 {
                    record.history.drain(..excess);
                }
                return;
            }
        }
        sessions.remove(id);
    }

    /// Number of live sessions. Expired-but-unswept sessions count until
    /// the next sweep or read.
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Periodic sweep loop. Holds a weak reference so the store's drop ends the
/// task; expired ids are collected first and removed one at a time, keeping
/// each lock hold to a single map operation.
async fn run_sweeper(inner: std::sync::Weak<Inner>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let now = Instant::now();
        let expired: Vec<String> = {
            let sessions = inner.sessions.lock().expect("session lock poisoned");
            sessions
                .iter()
                .filter(|(_, record)| inner.expired(record, now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in expired {
            let mut sessions = inner.sessions.lock().expect("session lock poisoned");
            let still_expired = sessions
                .get(&id)
                .is_some_and(|record| inner.expired(record, now));
            if still_expired {
                sessions.remove(&id);
                log::debug!("Expired session {}", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn test_create_returns_distinct_hex_ids() {
        let store = SessionStore::new(Duration::from_secs(3600), 10);
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_append_and_history_round_trip() {
        let store = SessionStore::new(Duration::from_secs(3600), 10);
        let id = store.create();
        store.append(&id, ChatMessage::user("hello"));
        store.append(&id, ChatMessage::assistant("hi"));

        let history = store.history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("hello"));
        assert_eq!(history[1], ChatMessage::assistant("hi"));
    }

    #[tokio::test]
    async fn test_unknown_id_reads_empty_and_append_is_noop() {
        let store = SessionStore::new(Duration::from_secs(3600), 10);
        assert!(store.history("deadbeef").is_empty());
        store.append("deadbeef", ChatMessage::user("lost"));
        assert!(store.history("deadbeef").is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_history_trimmed_to_max() {
        let store = SessionStore::new(Duration::from_secs(3600), 3);
        let id = store.create();
        for i in 0..5 {
            store.append(&id, ChatMessage::user(format!("m{}", i)));
        }
        let history = store.history(&id);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m2");
        assert_eq!(history[2].content, "m4");
    }

    #[tokio::test]
    async fn test_max_history_one_keeps_last() {
        let store = SessionStore::new(Duration::from_secs(3600), 1);
        let id = store.create();
        store.append(&id, ChatMessage::user("first"));
        store.append(&id, ChatMessage::user("second"));
        store.append(&id, ChatMessage::user("third"));
        let history = store.history(&id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "third");
    }

    #[tokio::test]
    async fn test_ensure_adopts_foreign_id() {
        let store = SessionStore::new(Duration::from_secs(3600), 10);
        store.ensure("client-chosen-id");
        store.append("client-chosen-id", ChatMessage::user("hello"));
        assert_eq!(store.history("client-chosen-id").len(), 1);

        // Idempotent: a second ensure keeps the history.
        store.ensure("client-chosen-id");
        assert_eq!(store.history("client-chosen-id").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_resets_expired_session() {
        let store = SessionStore::new(Duration::from_secs(1), 10);
        store.ensure("s");
        store.append("s", ChatMessage::user("old"));
        tokio::time::advance(Duration::from_secs(2)).await;
        store.ensure("s");
        assert!(store.history("s").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_refused_on_read() {
        let store = SessionStore::new(Duration::from_secs(1), 5);
        let id = store.create();
        for i in 0..3 {
            store.append(&id, ChatMessage::user(format!("m{}", i)));
        }

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(store.history(&id).is_empty());
        store.append(&id, ChatMessage::user("too late"));
        assert!(store.history(&id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_idle_sessions() {
        let store = SessionStore::new(Duration::from_secs(30), 5);
        let id = store.create();
        store.append(&id, ChatMessage::user("hello"));
        assert_eq!(store.len(), 1);

        // Yield once so the sweeper task starts and registers its interval
        // before time is advanced, then advance past the idle TTL and a
        // sweep tick; the sleep yields to the runtime so the sweeper task
        // gets polled again to act on it.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_keeps_session_alive() {
        let store = SessionStore::new(Duration::from_secs(40), 5);
        let id = store.create();
        store.append(&id, ChatMessage::user("hello"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.history(&id).len(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        // 60 s since creation but only 30 s since the last read.
        assert_eq!(store.history(&id).len(), 1);
    }
}
