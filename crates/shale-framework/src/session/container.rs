//! Container of live sessions.
//!
//! Holds weak references only: the endpoint's per-session worker owns the
//! strong handle, so a session disappears from the container as soon as
//! the endpoint releases it. Dead entries are pruned opportunistically.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::session::context::SessionContext;

/// Weakly-held collection of the sessions currently alive.
#[derive(Default)]
pub struct SessionContainer {
    sessions: RwLock<Vec<Weak<SessionContext>>>,
}

impl SessionContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live session.
    pub fn register(&self, context: &Arc<SessionContext>) {
        let mut sessions = self.sessions.write();
        sessions.retain(|entry| entry.strong_count() > 0);
        sessions.push(Arc::downgrade(context));
    }

    /// Find a live session by id.
    pub fn find(&self, session_id: u64) -> Option<Arc<SessionContext>> {
        self.sessions
            .read()
            .iter()
            .filter_map(|entry| entry.upgrade())
            .find(|context| context.info().id() == session_id)
    }

    /// Ids of every live session.
    pub fn enumerate_ids(&self) -> Vec<u64> {
        self.sessions
            .read()
            .iter()
            .filter_map(|entry| entry.upgrade())
            .map(|context| context.info().id())
            .collect()
    }

    /// Apply `f` to every live session.
    pub fn foreach(&self, mut f: impl FnMut(&Arc<SessionContext>)) {
        let alive: Vec<Arc<SessionContext>> = self
            .sessions
            .read()
            .iter()
            .filter_map(|entry| entry.upgrade())
            .collect();
        for context in &alive {
            f(context);
        }
    }

    /// Number of live sessions.
    pub fn size(&self) -> usize {
        self.sessions
            .read()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for SessionContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContainer")
            .field("size", &self.size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
