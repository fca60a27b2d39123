//! Loopback endpoint component.

use std::sync::Arc;

use parking_lot::Mutex;

use shale_framework::component::{Component, ComponentId, Endpoint, Service};
use shale_framework::environment::Environment;
use shale_framework::error::FrameworkError;
use shale_framework::ids;
use shale_framework::request::DatabaseInfo;
use shale_framework::session::variable::SessionVariableDeclarationSet;
use shale_framework::session::{SessionContainer, SessionResource};

use crate::loopback::client::LoopbackClient;

struct Shared {
    routing: Arc<dyn Service>,
    database_info: Arc<DatabaseInfo>,
    container: Arc<SessionContainer>,
    declarations: Arc<SessionVariableDeclarationSet>,
}

/// An endpoint with no transport: clients are created in-process.
///
/// Registered like any endpoint so it participates in the lifecycle, then
/// hands out [`LoopbackClient`]s once the server started.
pub struct LoopbackEndpoint {
    shared: Mutex<Option<Shared>>,
}

impl LoopbackEndpoint {
    pub fn new() -> Self {
        LoopbackEndpoint {
            shared: Mutex::new(None),
        }
    }

    /// Create a new in-process session. Available after `start`.
    pub fn client(&self, label: &str, application_name: &str) -> Option<LoopbackClient> {
        let shared = self.shared.lock();
        let shared = shared.as_ref()?;
        Some(LoopbackClient::new(
            Arc::clone(&shared.routing),
            Arc::clone(&shared.database_info),
            Arc::clone(&shared.container),
            Arc::clone(&shared.declarations),
            label,
            application_name,
        ))
    }
}

impl Default for LoopbackEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for LoopbackEndpoint {
    fn id(&self) -> ComponentId {
        ids::ENDPOINT_ID_LOOPBACK
    }

    fn label(&self) -> &'static str {
        "loopback_endpoint"
    }

    fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    fn start(&self, env: &Environment) -> Result<(), FrameworkError> {
        let routing = env.service_by_id(ids::SERVICE_ID_ROUTING).ok_or_else(|| {
            FrameworkError::Component("routing service is not registered".to_string())
        })?;
        let session = env.find_resource::<SessionResource>().ok_or_else(|| {
            FrameworkError::Component("session resource is not registered".to_string())
        })?;
        let database_name = env
            .configuration()
            .section("ipc_endpoint")
            .and_then(|section| section.get::<String>("database_name").ok().flatten())
            .unwrap_or_default();
        *self.shared.lock() = Some(Shared {
            routing,
            database_info: Arc::new(DatabaseInfo::new(database_name)),
            container: session.container(),
            declarations: session.variable_declarations(),
        });
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        *self.shared.lock() = None;
        Ok(())
    }
}

impl Endpoint for LoopbackEndpoint {}
