//! Request object produced by the stream session worker.

use std::sync::Arc;

use shale_framework::request::{DatabaseInfo, Request};
use shale_framework::session::store::SessionStore;
use shale_framework::session::variable::SessionVariableSet;
use shale_framework::session::{SessionContext, SessionInfo};

/// One framed request received over a stream session.
///
/// The payload still carries the framework header; the routing service
/// strips it before the target service sees the request.
pub struct StreamRequest {
    payload: Vec<u8>,
    local_id: u64,
    database_info: Arc<DatabaseInfo>,
    context: Arc<SessionContext>,
}

impl StreamRequest {
    pub(crate) fn new(
        payload: Vec<u8>,
        local_id: u64,
        database_info: Arc<DatabaseInfo>,
        context: Arc<SessionContext>,
    ) -> Self {
        StreamRequest {
            payload,
            local_id,
            database_info,
            context,
        }
    }
}

impl Request for StreamRequest {
    fn session_id(&self) -> u64 {
        self.context.info().id()
    }

    fn service_id(&self) -> u32 {
        shale_framework::ids::SERVICE_ID_ROUTING
    }

    fn local_id(&self) -> u64 {
        self.local_id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn database_info(&self) -> &DatabaseInfo {
        &self.database_info
    }

    fn session_info(&self) -> &SessionInfo {
        self.context.info()
    }

    fn session_store(&self) -> &SessionStore {
        self.context.store()
    }

    fn session_variable_set(&self) -> &SessionVariableSet {
        self.context.variables()
    }
}
