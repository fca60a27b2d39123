//! Routing service: the single entry point endpoints call.
//!
//! Parses the framework header off the request payload, locates the target
//! service by id, and forwards a re-targeted request view so services never
//! see wire framing. Parse failures and unknown service ids are answered
//! with server diagnostics records.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::component::{Component, ComponentId, Service};
use crate::environment::Environment;
use crate::error::FrameworkError;
use crate::ids;
use crate::proto::{self, DiagnosticCode, DiagnosticsRecord, RequestHeader};
use crate::request::{DatabaseInfo, Request};
use crate::response::{BlobInfo, Response};
use crate::session::store::SessionStore;
use crate::session::variable::SessionVariableSet;
use crate::session::SessionInfo;

/// Built-in service demultiplexing framed requests onto the registry.
pub struct RoutingService {
    // id -> service snapshot, captured at start
    services: RwLock<Vec<(ComponentId, Arc<dyn Service>)>>,
}

impl RoutingService {
    pub fn new() -> Self {
        RoutingService {
            services: RwLock::new(Vec::new()),
        }
    }

    fn find_service(&self, id: ComponentId) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .iter()
            .find(|(service_id, _)| *service_id == id)
            .map(|(_, service)| Arc::clone(service))
    }
}

impl Default for RoutingService {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for RoutingService {
    fn id(&self) -> ComponentId {
        ids::SERVICE_ID_ROUTING
    }

    fn label(&self) -> &'static str {
        "routing_service"
    }

    fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    fn start(&self, env: &Environment) -> Result<(), FrameworkError> {
        // capture the registry; it is append-only before start and
        // read-only afterwards
        let snapshot = env
            .service_repository()
            .read()
            .snapshot_with_ids()
            .into_iter()
            .filter(|(id, _)| *id != ids::SERVICE_ID_ROUTING)
            .collect();
        *self.services.write() = snapshot;
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        self.services.write().clear();
        Ok(())
    }
}

impl Service for RoutingService {
    fn operate(&self, request: Arc<dyn Request>, response: Arc<dyn Response>) -> bool {
        let payload = request.payload();
        let (header, body) = match proto::decode_request_header(payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(%error, "received an invalid request frame");
                response.error(DiagnosticsRecord::new(
                    DiagnosticCode::InvalidRequest,
                    format!("request header is not valid: {error}"),
                ));
                return false;
            }
        };
        let Some(service) = self.find_service(header.service_id) else {
            tracing::warn!(service_id = header.service_id, "request for unknown service");
            response.error(DiagnosticsRecord::new(
                DiagnosticCode::ServiceUnavailable,
                format!(
                    "destination service (ID={}) is not found",
                    header.service_id
                ),
            ));
            return false;
        };
        if header.session_id != 0 {
            response.set_session_id(header.session_id);
        } else {
            response.set_session_id(request.session_id());
        }
        let body = body.to_vec();
        let routed = RoutedRequest::new(request, &header, body);
        service.operate(Arc::new(routed), response)
    }
}

/// Request view handed to the target service: header stripped, target
/// re-bound, everything else delegated to the endpoint's request.
struct RoutedRequest {
    origin: Arc<dyn Request>,
    service_id: ComponentId,
    session_id: u64,
    body: Vec<u8>,
    blobs: Vec<Arc<BlobInfo>>,
}

impl RoutedRequest {
    fn new(origin: Arc<dyn Request>, header: &RequestHeader, body: Vec<u8>) -> Self {
        let session_id = if header.session_id != 0 {
            header.session_id
        } else {
            origin.session_id()
        };
        let blobs = header
            .blobs
            .iter()
            .map(|unit| {
                Arc::new(BlobInfo::new(
                    unit.channel_name.clone(),
                    unit.path.clone().into(),
                    unit.temporary,
                ))
            })
            .collect();
        RoutedRequest {
            service_id: header.service_id,
            session_id,
            body,
            blobs,
            origin,
        }
    }
}

impl Request for RoutedRequest {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn service_id(&self) -> u32 {
        self.service_id
    }

    fn local_id(&self) -> u64 {
        self.origin.local_id()
    }

    fn payload(&self) -> &[u8] {
        &self.body
    }

    fn database_info(&self) -> &DatabaseInfo {
        self.origin.database_info()
    }

    fn session_info(&self) -> &SessionInfo {
        self.origin.session_info()
    }

    fn session_store(&self) -> &SessionStore {
        self.origin.session_store()
    }

    fn session_variable_set(&self) -> &SessionVariableSet {
        self.origin.session_variable_set()
    }

    fn blobs(&self) -> &[Arc<BlobInfo>] {
        &self.blobs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
