//! Request object produced by the loopback client.

use std::sync::Arc;

use shale_framework::request::{DatabaseInfo, Request};
use shale_framework::session::store::SessionStore;
use shale_framework::session::variable::SessionVariableSet;
use shale_framework::session::{SessionContext, SessionInfo};

/// A framed request carried to the routing service without a wire.
pub struct LoopbackRequest {
    payload: Vec<u8>,
    local_id: u64,
    database_info: Arc<DatabaseInfo>,
    context: Arc<SessionContext>,
}

impl LoopbackRequest {
    pub(crate) fn new(
        payload: Vec<u8>,
        local_id: u64,
        database_info: Arc<DatabaseInfo>,
        context: Arc<SessionContext>,
    ) -> Self {
        LoopbackRequest {
            payload,
            local_id,
            database_info,
            context,
        }
    }
}

impl Request for LoopbackRequest {
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
