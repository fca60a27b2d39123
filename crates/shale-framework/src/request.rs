//! Request contract consumed by services.
//!
//! Endpoints construct a concrete request per framed message; services see
//! it through this trait only. A request is immutable for the service,
//! apart from the session store and variable set it hands out, which are
//! internally synchronized and intended for the request's worker thread.

use std::sync::Arc;
use std::time::SystemTime;

use crate::response::BlobInfo;
use crate::session::store::SessionStore;
use crate::session::variable::SessionVariableSet;
use crate::session::SessionInfo;

/// Information about the hosting database instance.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    name: String,
    process_id: u32,
    start_at: SystemTime,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseInfo {
            name: name.into(),
            process_id: std::process::id(),
            start_at: SystemTime::now(),
        }
    }

    /// The configured database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id of the server.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// When this server instance started.
    pub fn start_at(&self) -> SystemTime {
        self.start_at
    }
}

/// Request interface.
pub trait Request: Send + Sync {
    /// Session identifier this request belongs to.
    fn session_id(&self) -> u64;

    /// Target service identifier.
    fn service_id(&self) -> u32;

    /// Endpoint-local identifier of this request (e.g. the wire slot).
    fn local_id(&self) -> u64;

    /// The service-level payload bytes.
    fn payload(&self) -> &[u8];

    /// The hosting database information.
    fn database_info(&self) -> &DatabaseInfo;

    /// The session information.
    fn session_info(&self) -> &SessionInfo;

    /// The per-session typed key/value store.
    fn session_store(&self) -> &SessionStore;

    /// The per-session declared variables.
    fn session_variable_set(&self) -> &SessionVariableSet;

    /// Out-of-band blob attachments referenced by channel name.
    fn blobs(&self) -> &[Arc<BlobInfo>] {
        &[]
    }
}
