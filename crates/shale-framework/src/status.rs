//! Server status area for out-of-process tooling.
//!
//! Models the shared status segment: overall server state, the process id,
//! the database name, a mutex-file path, a fixed-size vector of active
//! session ids, and an atomic shutdown request with a condition-variable
//! pair that the control path waits on. The wire-level shared memory
//! itself lives outside the core; this resource is the owned handle the
//! rest of the server writes through.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::component::{Component, ComponentId, Resource};
use crate::environment::Environment;
use crate::error::FrameworkError;
use crate::ids;

/// Overall server state published to tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Ready,
    Activated,
    Deactivating,
    Deactivated,
    BootError,
}

/// Kind of shutdown requested from outside.
///
/// Monotonic like the per-session variant: forceful dominates graceful
/// dominates nothing, and nothing cannot be re-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownKind {
    Nothing = 0,
    Graceful = 1,
    Forceful = 2,
}

impl ShutdownKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShutdownKind::Graceful,
            2 => ShutdownKind::Forceful,
            _ => ShutdownKind::Nothing,
        }
    }
}

/// Session-id slot value marking an empty slot.
pub const INACTIVE_SESSION_ID: u64 = u64::MAX;

// two spare slots beyond the configured maximum, matching the original
// layout
const SLOT_MARGIN: usize = 2;

/// The status area contents.
pub struct StatusCore {
    state: RwLock<State>,
    pid: u32,
    database_name: RwLock<String>,
    mutex_file: RwLock<PathBuf>,
    sessions: Mutex<Vec<u64>>,
    shutdown_requested: AtomicU8,
    shutdown_mutex: Mutex<()>,
    shutdown_cv: Condvar,
}

impl StatusCore {
    fn new(database_name: String) -> Self {
        StatusCore {
            state: RwLock::new(State::Initial),
            pid: std::process::id(),
            database_name: RwLock::new(database_name),
            mutex_file: RwLock::new(PathBuf::new()),
            sessions: Mutex::new(Vec::new()),
            shutdown_requested: AtomicU8::new(ShutdownKind::Nothing as u8),
            shutdown_mutex: Mutex::new(()),
            shutdown_cv: Condvar::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The overall server state.
    pub fn whole(&self) -> State {
        *self.state.read()
    }

    /// Publish a new overall state.
    pub fn set_whole(&self, state: State) {
        *self.state.write() = state;
        tracing::debug!(?state, "server state updated");
    }

    pub fn database_name(&self) -> String {
        self.database_name.read().clone()
    }

    pub fn set_database_name(&self, name: impl Into<String>) {
        *self.database_name.write() = name.into();
    }

    pub fn mutex_file(&self) -> PathBuf {
        self.mutex_file.read().clone()
    }

    pub fn set_mutex_file(&self, path: PathBuf) {
        *self.mutex_file.write() = path;
    }

    /// Size the session slot vector for `n` concurrent sessions.
    pub fn set_maximum_sessions(&self, n: usize) {
        let mut sessions = self.sessions.lock();
        sessions.resize(n + SLOT_MARGIN, INACTIVE_SESSION_ID);
    }

    /// Record a session id in its slot.
    pub fn add_session(&self, session_id: u64, slot: usize) {
        let mut sessions = self.sessions.lock();
        if slot >= sessions.len() {
            sessions.resize(slot + 1, INACTIVE_SESSION_ID);
        }
        sessions[slot] = session_id;
    }

    /// Clear a session slot. The id must still match.
    pub fn remove_session(&self, session_id: u64, slot: usize) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(slot) {
            if *entry == session_id {
                *entry = INACTIVE_SESSION_ID;
            }
        }
    }

    /// Ids of the currently recorded sessions.
    pub fn active_sessions(&self) -> Vec<u64> {
        self.sessions
            .lock()
            .iter()
            .copied()
            .filter(|id| *id != INACTIVE_SESSION_ID)
            .collect()
    }

    /// The pending shutdown request.
    pub fn shutdown_request(&self) -> ShutdownKind {
        ShutdownKind::from_u8(self.shutdown_requested.load(Ordering::Acquire))
    }

    /// Raise the shutdown request and wake waiters.
    ///
    /// Returns false when the request does not advance the current state.
    pub fn request_shutdown(&self, kind: ShutdownKind) -> bool {
        if kind == ShutdownKind::Nothing {
            return false;
        }
        let mut current = self.shutdown_requested.load(Ordering::Acquire);
        loop {
            if current >= kind as u8 {
                return false;
            }
            match self.shutdown_requested.compare_exchange(
                current,
                kind as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        let _guard = self.shutdown_mutex.lock();
        self.shutdown_cv.notify_all();
        true
    }

    /// Block until a shutdown is requested, or until the timeout when one
    /// is given. Returns the pending request.
    pub fn wait_for_shutdown(&self, timeout: Option<Duration>) -> ShutdownKind {
        let mut guard = self.shutdown_mutex.lock();
        loop {
            let pending = self.shutdown_request();
            if pending != ShutdownKind::Nothing {
                return pending;
            }
            match timeout {
                Some(timeout) => {
                    if self.shutdown_cv.wait_for(&mut guard, timeout).timed_out() {
                        return self.shutdown_request();
                    }
                }
                None => self.shutdown_cv.wait(&mut guard),
            }
        }
    }
}

impl std::fmt::Debug for StatusCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCore")
            .field("state", &self.whole())
            .field("pid", &self.pid)
            .field("database_name", &self.database_name())
            .finish()
    }
}

/// Resource component owning the status area.
pub struct StatusResource {
    core: Arc<StatusCore>,
}

impl StatusResource {
    pub fn new() -> Self {
        StatusResource {
            core: Arc::new(StatusCore::new(String::new())),
        }
    }

    /// The status area handle.
    pub fn core(&self) -> Arc<StatusCore> {
        Arc::clone(&self.core)
    }
}

impl Default for StatusResource {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for StatusResource {
    fn id(&self) -> ComponentId {
        ids::RESOURCE_ID_STATUS
    }

    fn label(&self) -> &'static str {
        "status_resource"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        if let Some(section) = env.configuration().section("ipc_endpoint") {
            if let Some(name) = section.get::<String>("database_name")? {
                self.core.set_database_name(name);
            }
        }
        Ok(())
    }

    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        self.core.set_whole(State::Deactivated);
        Ok(())
    }
}

impl Resource for StatusResource {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
