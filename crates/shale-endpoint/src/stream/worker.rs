//! Per-session worker for the stream endpoint.
//!
//! Performs the session handshake, then loops receiving frames: payload
//! frames are dispatched through the routing service, cancel commands
//! (payloads targeting the endpoint broker) flip the cancel flag of the
//! in-flight response they name, and a session bye winds the session
//! down. Services may complete responses asynchronously; the worker keeps
//! reading while they do.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use shale_framework::component::Service;
use shale_framework::ids;
use shale_framework::proto::{self, CancelRequest, ClientInformation};
use shale_framework::request::DatabaseInfo;
use shale_framework::response::Response;
use shale_framework::session::{
    allocate_session_id, SessionContainer, SessionContext, SessionInfo, SessionWorker,
    ShutdownRequest, UserType,
};
use shale_framework::session::variable::SessionVariableDeclarationSet;
use shale_framework::status::StatusCore;

use crate::stream::request::StreamRequest;
use crate::stream::response::{SlotMap, StreamResponse};
use crate::stream::socket::{frame, RequestFrame, StreamSocket};

/// Shared pieces the listener hands to every session worker.
pub(crate) struct WorkerShared {
    pub(crate) routing: Arc<dyn Service>,
    pub(crate) database_info: Arc<DatabaseInfo>,
    pub(crate) container: Arc<SessionContainer>,
    pub(crate) declarations: Arc<SessionVariableDeclarationSet>,
    pub(crate) status: Option<Arc<StatusCore>>,
}

/// One session worker driving one connection.
pub(crate) struct StreamWorker {
    shared: Arc<WorkerShared>,
    socket: Arc<StreamSocket>,
    slot_index: usize,
    context: Mutex<Option<Arc<SessionContext>>>,
    slots: SlotMap,
}

impl StreamWorker {
    pub(crate) fn new(
        shared: Arc<WorkerShared>,
        socket: Arc<StreamSocket>,
        slot_index: usize,
    ) -> Arc<Self> {
        Arc::new(StreamWorker {
            shared,
            socket,
            slot_index,
            context: Mutex::new(None),
            slots: Arc::new(Mutex::new(FxHashMap::default())),
        })
    }

    /// Service the session until the peer says bye or the connection drops.
    pub(crate) fn run(self: &Arc<Self>) {
        let session_id = match self.handshake() {
            Some(session_id) => session_id,
            None => return,
        };
        tracing::debug!(
            session_id,
            peer = self.socket.peer(),
            "stream session started"
        );
        while !self.socket.is_session_closed() {
            let frame = match self.socket.recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    if !self.socket.is_session_closed() {
                        tracing::warn!(session_id, error = %e, "stream session receive failed");
                    }
                    break;
                }
            };
            match frame.frame_type {
                frame::REQUEST_SESSION_PAYLOAD => self.handle_payload(frame),
                frame::REQUEST_SESSION_BYE => {
                    let _ = self
                        .socket
                        .send_response(frame::RESPONSE_SESSION_BYE_OK, frame.slot, &[]);
                    self.socket.close_session();
                }
                frame::REQUEST_RESULT_SET_BYE_OK => {
                    // client acknowledged a result-set bye; nothing to do
                }
                other => {
                    tracing::warn!(session_id, frame_type = other, "unexpected request frame");
                }
            }
        }
        self.teardown(session_id);
        tracing::debug!(session_id, "stream session finished");
    }

    /// Expect the session hello and reply with the assigned session id.
    fn handshake(self: &Arc<Self>) -> Option<u64> {
        let hello = match self.socket.recv() {
            Ok(Some(frame)) if frame.frame_type == frame::REQUEST_SESSION_HELLO => frame,
            Ok(Some(frame)) => {
                tracing::warn!(
                    frame_type = frame.frame_type,
                    "expected session hello, closing connection"
                );
                return None;
            }
            _ => return None,
        };
        let information = proto::decode_delimited::<ClientInformation>(&hello.payload)
            .map(|(information, _)| information)
            .unwrap_or_default();

        let session_id = allocate_session_id();
        let info = SessionInfo::new(
            session_id,
            information.connection_label,
            information.application_name,
            "tcp",
            self.socket.peer(),
            None,
            UserType::Administrator,
        );
        let context = Arc::new(SessionContext::new(
            info,
            self.shared.declarations.instantiate(),
        ));
        self.shared.container.register(&context);
        context.set_worker(&(Arc::clone(self) as Arc<dyn SessionWorker>));
        *self.context.lock() = Some(Arc::clone(&context));

        if let Some(status) = &self.shared.status {
            status.add_session(session_id, self.slot_index);
        }
        if self
            .socket
            .send_response(
                frame::RESPONSE_SESSION_HELLO_OK,
                hello.slot,
                session_id.to_string().as_bytes(),
            )
            .is_err()
        {
            return None;
        }
        Some(session_id)
    }

    fn handle_payload(&self, frame: RequestFrame) {
        // cancel commands target the endpoint broker and name the slot of
        // the job to cancel; they produce no reply of their own
        if let Ok((header, body)) = proto::decode_request_header(&frame.payload) {
            if header.service_id == ids::SERVICE_ID_ENDPOINT_BROKER {
                let target = proto::decode_delimited::<CancelRequest>(body)
                    .map(|(cancel, _)| cancel.local_id as u16)
                    .unwrap_or(frame.slot);
                if let Some(response) = self.slots.lock().get(&target) {
                    response.request_cancel();
                } else {
                    tracing::debug!(slot = target, "cancel for an unknown or finished job");
                }
                return;
            }
        }
        let Some(context) = self.context.lock().clone() else {
            return;
        };
        let response = StreamResponse::new(
            Arc::clone(&self.socket),
            frame.slot,
            Arc::clone(&self.slots),
        );
        response.set_session_id(context.info().id());
        let request = Arc::new(StreamRequest::new(
            frame.payload,
            frame.slot as u64,
            Arc::clone(&self.shared.database_info),
            context,
        ));
        let accepted = self.shared.routing.operate(request, response as _);
        if !accepted {
            tracing::debug!(slot = frame.slot, "request was not accepted");
        }
    }

    fn teardown(&self, session_id: u64) {
        self.socket.disconnect();
        let context = self.context.lock().take();
        if let Some(context) = context {
            context.store().dispose();
        }
        if let Some(status) = &self.shared.status {
            status.remove_session(session_id, self.slot_index);
        }
    }
}

impl SessionWorker for StreamWorker {
    fn request_shutdown(&self, request: ShutdownRequest) {
        match request {
            ShutdownRequest::Forceful => self.socket.disconnect(),
            _ => self.socket.close_session(),
        }
    }
}
