//! Component traits and the boot mode.
//!
//! Every unit of the server is a component of one of three kinds:
//! resource, service, or endpoint. Components share a deterministic
//! three-phase lifecycle; services additionally accept request/response
//! pairs, and endpoints own their transports.

use std::sync::Arc;

use crate::environment::Environment;
use crate::error::FrameworkError;
use crate::request::Request;
use crate::response::Response;

/// Numeric component identifier.
pub type ComponentId = u32;

/// Ids at or below this value are reserved for the framework.
pub const MAX_SYSTEM_RESERVED_ID: ComponentId = 255;

/// How the server process was booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Regular database server operation.
    DatabaseServer,
    /// Maintenance tasks only; endpoints stay closed to regular clients.
    MaintenanceServer,
    /// Minimal boot used to hold the database exclusively.
    QuiescentServer,
}

/// A unit of the server with a deterministic lifecycle.
///
/// Lifecycle methods must be idempotent with respect to partial
/// initialization: `shutdown` may be called after a failed `setup` or
/// `start` and must clean up whatever exists.
pub trait Component: Send + Sync + 'static {
    /// The component id, stable across versions.
    fn id(&self) -> ComponentId;

    /// Human readable label of this component.
    fn label(&self) -> &'static str;

    /// Prepare the component (the state becomes `ready`).
    fn setup(&self, env: &Environment) -> Result<(), FrameworkError>;

    /// Activate the component (the state becomes `activated`).
    fn start(&self, env: &Environment) -> Result<(), FrameworkError>;

    /// Deactivate the component (the state becomes `deactivated`).
    fn shutdown(&self, env: &Environment) -> Result<(), FrameworkError>;
}

/// A component providing shared infrastructure to services and endpoints.
pub trait Resource: Component {}

/// A component that accepts request/response pairs.
pub trait Service: Component {
    /// Process one request, writing the outcome into `response`.
    ///
    /// Returns true when the request was accepted; the response carries
    /// the actual result or diagnostics either way.
    fn operate(&self, request: Arc<dyn Request>, response: Arc<dyn Response>) -> bool;
}

/// A component that owns a transport and produces request/response pairs.
pub trait Endpoint: Component {}
