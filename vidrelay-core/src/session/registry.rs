use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{Session, SessionId, SessionSnapshot};

/// Lookup table of live sessions.
///
/// Implementations must be safe under concurrent calls from independent
/// sessions, and `remove` must be idempotent.
pub trait SessionRegistry: Send + Sync {
    fn create(&self, prefix: &str) -> Arc<Session>;
    fn lookup(&self, id: &SessionId) -> Option<Arc<Session>>;
    /// Returns whether an entry was present.
    fn remove(&self, id: &SessionId) -> bool;
    fn snapshot(&self) -> Vec<SessionSnapshot>;

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRegistry for InMemorySessionRegistry {
    fn create(&self, prefix: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::generate(prefix)));
        self.guard()
            .insert(session.id().clone(), Arc::clone(&session));
        debug!(session_id = %session.id(), "session registered");
        session
    }

    fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.guard().get(id).cloned()
    }

    fn remove(&self, id: &SessionId) -> bool {
        let removed = self.guard().remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.guard().values().map(|session| session.snapshot()).collect()
    }

    fn len(&self) -> usize {
        self.guard().len()
    }
}

/// Keeps a session registered for as long as the lease is alive.
///
/// Dropping the lease (normal completion, error, or a cancelled task whose
/// future is dropped) removes the entry.
pub struct SessionLease {
    registry: Arc<dyn SessionRegistry>,
    session: Arc<Session>,
}

impl SessionLease {
    pub fn open(registry: Arc<dyn SessionRegistry>, prefix: &str) -> Self {
        let session = registry.create(prefix);
        Self { registry, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.remove(self.session.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lookup_remove() {
        let registry = InMemorySessionRegistry::new();
        let session = registry.create("stream");
        assert!(session.id().as_str().starts_with("stream_"));
        let found = registry.lookup(session.id()).expect("session registered");
        assert!(Arc::ptr_eq(&found, &session));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(session.id()));
        assert!(!registry.remove(session.id()));
        assert!(registry.lookup(session.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn lease_unregisters_on_drop_and_tolerates_prior_removal() {
        let registry: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionRegistry::new());
        let lease = SessionLease::open(Arc::clone(&registry), "process");
        let id = lease.id().clone();
        assert!(registry.lookup(&id).is_some());

        // A racing cancellation path removed it first.
        assert!(registry.remove(&id));
        lease.release();
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_sessions_register_independently() {
        let registry: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let lease = SessionLease::open(Arc::clone(&registry), "stream");
                    lease.session().record_chunk(0, 8);
                    let seen = registry.lookup(lease.id()).map(|s| s.bytes_received());
                    lease.release();
                    seen
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(8));
        }
        assert!(registry.is_empty());
    }
}
