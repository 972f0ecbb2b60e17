//! The set of sessions currently copying bytes.
//!
//! Each orchestrator owns one [`SessionRegistry`].  It is touched only when a
//! session starts, when it ends, and when someone enumerates sessions, never
//! from the copy loops, so a plain `std::sync::Mutex` is enough.  The lock is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{SessionInfo, SessionKey};
use crate::infrastructure::peer::SessionHandle;

/// Registered sessions keyed by [`SessionKey`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<dyn SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<dyn SessionHandle>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a session under its own key.
    pub fn register(&self, session: Arc<dyn SessionHandle>) -> SessionKey {
        let key = session.info().key;
        self.lock().insert(key, session);
        key
    }

    /// Removes a session; returns `true` if it was present.
    pub fn deregister(&self, key: &SessionKey) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshots every registered session.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.lock().values().map(|s| s.info()).collect()
    }

    /// Closes one session.  The copy loops then end and the owning task
    /// deregisters it.  Returns `false` if the key is unknown.
    pub fn close(&self, key: &SessionKey) -> bool {
        let session = self.lock().get(key).cloned();
        match session {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Closes every registered session; returns how many were closed.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.iter().filter(|s| s.close()).count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct FakeSession {
        key: SessionKey,
        closes: AtomicUsize,
    }

    impl FakeSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                key: SessionKey::new(),
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl SessionHandle for FakeSession {
        fn info(&self) -> SessionInfo {
            SessionInfo {
                key: self.key,
                client: "client".into(),
                backend: "backend".into(),
                backend_tls: false,
                registered_at: Instant::now(),
            }
        }

        fn close(&self) -> bool {
            self.closes.fetch_add(1, Ordering::SeqCst) == 0
        }
    }

    #[test]
    fn test_register_and_deregister() {
        // Arrange
        let registry = SessionRegistry::new();
        let session = FakeSession::new();

        // Act
        let key = registry.register(session.clone());

        // Assert
        assert_eq!(key, session.key);
        assert!(registry.contains(&key));
        assert_eq!(registry.len(), 1);
        assert!(registry.deregister(&key));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_twice_returns_false() {
        let registry = SessionRegistry::new();
        let key = registry.register(FakeSession::new());

        assert!(registry.deregister(&key));
        assert!(!registry.deregister(&key));
    }

    #[test]
    fn test_snapshot_lists_every_session() {
        let registry = SessionRegistry::new();
        let a = registry.register(FakeSession::new());
        let b = registry.register(FakeSession::new());

        let mut keys: Vec<_> = registry.snapshot().into_iter().map(|i| i.key).collect();
        keys.sort();
        let mut expected = vec![a, b];
        expected.sort();

        assert_eq!(keys, expected);
    }

    #[test]
    fn test_close_by_key_leaves_session_registered() {
        // Arrange
        let registry = SessionRegistry::new();
        let session = FakeSession::new();
        let key = registry.register(session.clone());

        // Act
        let found = registry.close(&key);

        // Assert: removal is the owning task's job
        assert!(found);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
        assert!(registry.contains(&key));
    }

    #[test]
    fn test_close_unknown_key_returns_false() {
        let registry = SessionRegistry::new();
        assert!(!registry.close(&SessionKey::new()));
    }

    #[test]
    fn test_close_all_counts_first_closes_only() {
        let registry = SessionRegistry::new();
        let a = FakeSession::new();
        registry.register(a.clone());
        registry.register(FakeSession::new());
        a.close();

        assert_eq!(registry.close_all(), 1);
    }
}
