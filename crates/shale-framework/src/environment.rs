//! Server environment: boot mode, configuration, and the three component
//! repositories.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::component::{BootMode, Component, ComponentId, Endpoint, Resource, Service};
use crate::config::Configuration;
use crate::repository::Repository;

/// Shared state every component sees during its lifecycle.
///
/// The repositories are append-only before `start()` and read-only
/// afterwards; services look up their peers during start.
pub struct Environment {
    mode: BootMode,
    configuration: Arc<Configuration>,
    resource_repository: RwLock<Repository<dyn Resource>>,
    service_repository: RwLock<Repository<dyn Service>>,
    endpoint_repository: RwLock<Repository<dyn Endpoint>>,
}

impl Environment {
    pub fn new(mode: BootMode, configuration: Arc<Configuration>) -> Self {
        Environment {
            mode,
            configuration,
            resource_repository: RwLock::new(Repository::new()),
            service_repository: RwLock::new(Repository::new()),
            endpoint_repository: RwLock::new(Repository::new()),
        }
    }

    pub fn mode(&self) -> BootMode {
        self.mode
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn resource_repository(&self) -> &RwLock<Repository<dyn Resource>> {
        &self.resource_repository
    }

    pub fn service_repository(&self) -> &RwLock<Repository<dyn Service>> {
        &self.service_repository
    }

    pub fn endpoint_repository(&self) -> &RwLock<Repository<dyn Endpoint>> {
        &self.endpoint_repository
    }

    /// Add a resource, keeping the typed handle retrievable.
    pub fn add_resource<C: Resource>(&self, component: Arc<C>) {
        let object: Arc<dyn Resource> = component.clone();
        let any: Arc<dyn Any + Send + Sync> = component;
        self.resource_repository.write().add(object, any);
    }

    /// Add a service, keeping the typed handle retrievable.
    pub fn add_service<C: Service>(&self, component: Arc<C>) {
        let object: Arc<dyn Service> = component.clone();
        let any: Arc<dyn Any + Send + Sync> = component;
        self.service_repository.write().add(object, any);
    }

    /// Add an endpoint, keeping the typed handle retrievable.
    pub fn add_endpoint<C: Endpoint>(&self, component: Arc<C>) {
        let object: Arc<dyn Endpoint> = component.clone();
        let any: Arc<dyn Any + Send + Sync> = component;
        self.endpoint_repository.write().add(object, any);
    }

    /// Find the first resource of the concrete type `C`.
    pub fn find_resource<C: Component>(&self) -> Option<Arc<C>> {
        self.resource_repository.read().find::<C>()
    }

    /// Find the first service of the concrete type `C`.
    pub fn find_service<C: Component>(&self) -> Option<Arc<C>> {
        self.service_repository.read().find::<C>()
    }

    /// Look up a service by numeric id.
    pub fn service_by_id(&self, id: ComponentId) -> Option<Arc<dyn Service>> {
        self.service_repository.read().find_by_id(id)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("mode", &self.mode)
            .field("resources", &self.resource_repository.read().size())
            .field("services", &self.service_repository.read().size())
            .field("endpoints", &self.endpoint_repository.read().size())
            .finish()
    }
}
