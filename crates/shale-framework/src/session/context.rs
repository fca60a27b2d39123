//! Session context: the state scoped to one client connection.
//!
//! The endpoint's per-session worker holds the strong handle to its
//! context; the context holds only a weak back-reference to the worker so
//! the session-shutdown path can signal it without keeping it alive.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::session::info::SessionInfo;
use crate::session::store::SessionStore;
use crate::session::variable::SessionVariableSet;

/// Shutdown requested for a session.
///
/// Monotonic: forceful dominates graceful dominates nothing, and nothing
/// cannot be re-set once a request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownRequest {
    Nothing = 0,
    Graceful = 1,
    Forceful = 2,
}

impl ShutdownRequest {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShutdownRequest::Graceful,
            2 => ShutdownRequest::Forceful,
            _ => ShutdownRequest::Nothing,
        }
    }
}

/// The worker object driving a session, seen from the session layer.
pub trait SessionWorker: Send + Sync {
    /// Ask the worker to wind the session down.
    fn request_shutdown(&self, request: ShutdownRequest);
}

/// State scoped to one client connection.
pub struct SessionContext {
    info: SessionInfo,
    variables: SessionVariableSet,
    store: SessionStore,
    shutdown_request: AtomicU8,
    worker: Mutex<Weak<dyn SessionWorker>>,
}

impl SessionContext {
    pub fn new(info: SessionInfo, variables: SessionVariableSet) -> Self {
        SessionContext {
            info,
            variables,
            store: SessionStore::new(),
            shutdown_request: AtomicU8::new(ShutdownRequest::Nothing as u8),
            worker: Mutex::new(Weak::<NullWorker>::new()),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn variables(&self) -> &SessionVariableSet {
        &self.variables
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The current shutdown request state.
    pub fn shutdown_request(&self) -> ShutdownRequest {
        ShutdownRequest::from_u8(self.shutdown_request.load(Ordering::Acquire))
    }

    /// Raise the shutdown request state.
    ///
    /// Returns true when the state advanced; requesting `Nothing`, or a
    /// level at or below the current one, reports false. The accepted
    /// request is also forwarded to the session worker when one is alive.
    pub fn request_shutdown(&self, request: ShutdownRequest) -> bool {
        if request == ShutdownRequest::Nothing {
            return false;
        }
        let mut current = self.shutdown_request.load(Ordering::Acquire);
        loop {
            if current >= request as u8 {
                return false;
            }
            match self.shutdown_request.compare_exchange(
                current,
                request as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        if let Some(worker) = self.worker() {
            worker.request_shutdown(request);
        }
        true
    }

    /// Attach the worker driving this session (weakly held).
    pub fn set_worker(&self, worker: &Arc<dyn SessionWorker>) {
        *self.worker.lock() = Arc::downgrade(worker);
    }

    /// The session worker, while it is still alive.
    pub fn worker(&self) -> Option<Arc<dyn SessionWorker>> {
        self.worker.lock().upgrade()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.info.id())
            .field("shutdown_request", &self.shutdown_request())
            .finish()
    }
}

// placeholder worker type used to seed the weak slot
struct NullWorker;
impl SessionWorker for NullWorker {
    fn request_shutdown(&self, _request: ShutdownRequest) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
