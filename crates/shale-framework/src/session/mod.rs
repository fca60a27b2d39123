//! Per-session state: info, typed store, declared variables, context, and
//! the container of live sessions.

pub mod container;
pub mod context;
pub mod info;
pub mod resource;
pub mod store;
pub mod variable;

pub use container::SessionContainer;
pub use context::{SessionContext, SessionWorker, ShutdownRequest};
pub use info::{SessionInfo, UserType};
pub use resource::SessionResource;
pub use store::{SessionElement, SessionStore};
pub use variable::{
    SessionVariableDeclaration, SessionVariableDeclarationSet, SessionVariableSet, VariableType,
    VariableValue,
};

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique session id. Ids start at 1.
pub fn allocate_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}
