//! Session resource: the framework component exposing living sessions and
//! the variable declarations to its peers.

use std::sync::Arc;

use crate::component::{Component, ComponentId, Resource};
use crate::environment::Environment;
use crate::error::FrameworkError;
use crate::ids;
use crate::session::container::SessionContainer;
use crate::session::variable::SessionVariableDeclarationSet;

/// Provides the session container and variable declarations.
///
/// Endpoints register each session they create; services look the resource
/// up during start to reach their peers' sessions.
pub struct SessionResource {
    container: Arc<SessionContainer>,
    declarations: Arc<SessionVariableDeclarationSet>,
}

impl SessionResource {
    pub fn new() -> Self {
        SessionResource {
            container: Arc::new(SessionContainer::new()),
            declarations: Arc::new(SessionVariableDeclarationSet::new()),
        }
    }

    /// The container of live sessions.
    pub fn container(&self) -> Arc<SessionContainer> {
        Arc::clone(&self.container)
    }

    /// The registered variable declarations.
    pub fn variable_declarations(&self) -> Arc<SessionVariableDeclarationSet> {
        Arc::clone(&self.declarations)
    }
}

impl Default for SessionResource {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for SessionResource {
    fn id(&self) -> ComponentId {
        ids::RESOURCE_ID_SESSION
    }

    fn label(&self) -> &'static str {
        "session_resource"
    }

    fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        Ok(())
    }
}

impl Resource for SessionResource {}
