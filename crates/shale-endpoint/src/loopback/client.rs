//! Loopback client: one in-process session talking to the routing service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shale_framework::component::Service;
use shale_framework::proto::{self, RequestHeader};
use shale_framework::request::DatabaseInfo;
use shale_framework::session::{
    allocate_session_id, SessionContainer, SessionContext, SessionInfo, UserType,
};
use shale_framework::session::variable::SessionVariableDeclarationSet;

use crate::loopback::request::LoopbackRequest;
use crate::loopback::response::LoopbackResponse;

/// One in-process session reaching services through the routing service.
///
/// The client owns the session's strong handle; dropping the client (or
/// calling [`LoopbackClient::close`]) tears the session down and disposes
/// its store.
pub struct LoopbackClient {
    routing: Arc<dyn Service>,
    database_info: Arc<DatabaseInfo>,
    context: Option<Arc<SessionContext>>,
    next_local_id: AtomicU64,
}

impl LoopbackClient {
    pub(crate) fn new(
        routing: Arc<dyn Service>,
        database_info: Arc<DatabaseInfo>,
        container: Arc<SessionContainer>,
        declarations: Arc<SessionVariableDeclarationSet>,
        label: &str,
        application_name: &str,
    ) -> Self {
        let session_id = allocate_session_id();
        let info = SessionInfo::new(
            session_id,
            label,
            application_name,
            "loopback",
            "",
            None,
            UserType::Administrator,
        );
        let context = Arc::new(SessionContext::new(info, declarations.instantiate()));
        container.register(&context);
        LoopbackClient {
            routing,
            database_info,
            context: Some(context),
            next_local_id: AtomicU64::new(0),
        }
    }

    /// The id of the session this client holds.
    pub fn session_id(&self) -> u64 {
        self.context
            .as_ref()
            .map(|context| context.info().id())
            .unwrap_or(0)
    }

    /// The session context, while the client is open.
    pub fn context(&self) -> Option<Arc<SessionContext>> {
        self.context.clone()
    }

    /// Send a framed request to `service_id` and return the buffered
    /// response.
    ///
    /// The response may complete asynchronously; use
    /// [`LoopbackResponse::wait_completion`] when the target schedules its
    /// work.
    pub fn request(&self, service_id: u32, payload: &[u8]) -> Arc<LoopbackResponse> {
        let context = self
            .context
            .as_ref()
            .expect("loopback client already closed");
        let header = RequestHeader {
            service_id,
            session_id: context.info().id(),
            ..Default::default()
        };
        let framed = proto::encode_request(&header, payload);
        let local_id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(LoopbackRequest::new(
            framed,
            local_id,
            Arc::clone(&self.database_info),
            Arc::clone(context),
        ));
        let response = Arc::new(LoopbackResponse::new());
        let accepted = self.routing.operate(request, Arc::clone(&response) as _);
        if !accepted {
            tracing::debug!(service_id, "loopback request was not accepted");
        }
        response
    }

    /// Send a pre-built request carrying a prepared response, for callers
    /// that need to set the cancel flag before dispatch.
    pub fn request_with_response(
        &self,
        service_id: u32,
        payload: &[u8],
        response: &Arc<LoopbackResponse>,
    ) -> bool {
        let context = self
            .context
            .as_ref()
            .expect("loopback client already closed");
        let header = RequestHeader {
            service_id,
            session_id: context.info().id(),
            ..Default::default()
        };
        let framed = proto::encode_request(&header, payload);
        let local_id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(LoopbackRequest::new(
            framed,
            local_id,
            Arc::clone(&self.database_info),
            Arc::clone(context),
        ));
        self.routing.operate(request, Arc::clone(response) as _)
    }

    /// Close the session, disposing its store. Idempotent.
    pub fn close(&mut self) {
        if let Some(context) = self.context.take() {
            context.store().dispose();
        }
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.close();
    }
}
