//! The server: three component repositories driven through a deterministic
//! lifecycle.
//!
//! `setup` and `start` iterate resources, then services, then endpoints in
//! insertion order and short-circuit on the first failure, shutting down
//! whatever was already brought up. `shutdown` iterates endpoints, then
//! services, then resources in reverse order and never short-circuits, so
//! every component gets its chance to clean up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::component::{BootMode, Component, ComponentId, Endpoint, Resource, Service};
use crate::config::Configuration;
use crate::environment::Environment;
use crate::error::FrameworkError;
use crate::routing::RoutingService;
use crate::session::resource::SessionResource;
use crate::status::StatusResource;

/// The top-level server assembling resources, services, and endpoints.
pub struct Server {
    environment: Arc<Environment>,
    setup_done: AtomicBool,
}

impl Server {
    pub fn new(mode: BootMode, configuration: Arc<Configuration>) -> Self {
        Server {
            environment: Arc::new(Environment::new(mode, configuration)),
            setup_done: AtomicBool::new(false),
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn add_resource<C: Resource>(&self, component: Arc<C>) {
        self.environment.add_resource(component);
    }

    pub fn add_service<C: Service>(&self, component: Arc<C>) {
        self.environment.add_service(component);
    }

    pub fn add_endpoint<C: Endpoint>(&self, component: Arc<C>) {
        self.environment.add_endpoint(component);
    }

    pub fn find_resource<C: Component>(&self) -> Option<Arc<C>> {
        self.environment.find_resource::<C>()
    }

    pub fn find_service<C: Component>(&self) -> Option<Arc<C>> {
        self.environment.find_service::<C>()
    }

    pub fn find_service_by_id(&self, id: ComponentId) -> Option<Arc<dyn Service>> {
        self.environment.service_by_id(id)
    }

    /// Set up every component in priority order.
    ///
    /// On failure the already set-up components are shut down and the
    /// error is returned. Idempotent once successful.
    pub fn setup(&self) -> Result<(), FrameworkError> {
        if self.setup_done.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self.run_forward_phase("setup", Phase::Setup);
        if let Err(error) = result {
            tracing::error!("server application framework setup phase failed");
            let _ = self.shutdown();
            return Err(error);
        }
        self.setup_done.store(true, Ordering::Release);
        Ok(())
    }

    /// Start every component in priority order, running setup first when
    /// needed. On failure the started components are shut down.
    pub fn start(&self) -> Result<(), FrameworkError> {
        if !self.setup_done.load(Ordering::Acquire) {
            self.setup()?;
        }
        let result = self.run_forward_phase("start", Phase::Start);
        if let Err(error) = result {
            tracing::error!("server application framework start phase failed");
            let _ = self.shutdown();
            return Err(error);
        }
        Ok(())
    }

    /// Shut down every component in reverse order.
    ///
    /// Never short-circuits; the first error is reported after every
    /// component had its chance to clean up.
    pub fn shutdown(&self) -> Result<(), FrameworkError> {
        let env = &self.environment;
        let mut first_error: Option<FrameworkError> = None;

        // the closures keep each failure for themselves so the iteration
        // visits every component
        env.endpoint_repository().read().each(
            |component| {
                run_shutdown(component.as_ref(), env, &mut first_error);
                Ok(())
            },
            true,
        )?;
        env.service_repository().read().each(
            |component| {
                run_shutdown(component.as_ref(), env, &mut first_error);
                Ok(())
            },
            true,
        )?;
        env.resource_repository().read().each(
            |component| {
                run_shutdown(component.as_ref(), env, &mut first_error);
                Ok(())
            },
            true,
        )?;
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    // the registries are append-only before start() and read-only after,
    // so the read lock may be held across the component callbacks
    fn run_forward_phase(&self, phase: &'static str, kind: Phase) -> Result<(), FrameworkError> {
        let env = &self.environment;
        env.resource_repository().read().each(
            |component| run_step(component.as_ref(), env, phase, kind),
            false,
        )?;
        env.service_repository().read().each(
            |component| run_step(component.as_ref(), env, phase, kind),
            false,
        )?;
        env.endpoint_repository().read().each(
            |component| run_step(component.as_ref(), env, phase, kind),
            false,
        )?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Setup,
    Start,
}

fn run_step<T: Component + ?Sized>(
    component: &T,
    env: &Environment,
    phase: &'static str,
    kind: Phase,
) -> Result<(), FrameworkError> {
    tracing::debug!(component = component.label(), phase, "lifecycle begin");
    let result = match kind {
        Phase::Setup => component.setup(env),
        Phase::Start => component.start(env),
    };
    tracing::debug!(
        component = component.label(),
        phase,
        success = result.is_ok(),
        "lifecycle end"
    );
    result
}

fn run_shutdown<T: Component + ?Sized>(
    component: &T,
    env: &Environment,
    first_error: &mut Option<FrameworkError>,
) {
    tracing::debug!(component = component.label(), "lifecycle shutdown begin");
    if let Err(error) = component.shutdown(env) {
        tracing::warn!(
            component = component.label(),
            %error,
            "component shutdown failed"
        );
        first_error.get_or_insert(error);
    }
    tracing::debug!(component = component.label(), "lifecycle shutdown end");
}

/// Register the components every server carries: the status and session
/// resources and the routing service. Endpoints and application services
/// are registered by the embedder on top of these.
pub fn add_core_components(server: &Server) {
    server.add_resource(Arc::new(StatusResource::new()));
    server.add_resource(Arc::new(SessionResource::new()));
    server.add_service(Arc::new(RoutingService::new()));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn server() -> Server {
        let configuration = Arc::new(Configuration::from_str("", "").unwrap());
        Server::new(BootMode::DatabaseServer, configuration)
    }

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        id: ComponentId,
        label: &'static str,
        log: EventLog,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn event(&self, phase: &str) -> Result<(), FrameworkError> {
            self.log.lock().push(format!("{}:{}", self.label, phase));
            if self.fail_on == Some(phase) {
                return Err(FrameworkError::Component(format!(
                    "{} failed at {}",
                    self.label, phase
                )));
            }
            Ok(())
        }
    }

    impl Component for Recorder {
        fn id(&self) -> ComponentId {
            self.id
        }
        fn label(&self) -> &'static str {
            self.label
        }
        fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
            self.event("setup")
        }
        fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
            self.event("start")
        }
        fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
            self.event("shutdown")
        }
    }

    impl Resource for Recorder {}

    struct ServiceRecorder(Recorder);
    impl Component for ServiceRecorder {
        fn id(&self) -> ComponentId {
            self.0.id
        }
        fn label(&self) -> &'static str {
            self.0.label
        }
        fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
            self.0.setup(env)
        }
        fn start(&self, env: &Environment) -> Result<(), FrameworkError> {
            self.0.start(env)
        }
        fn shutdown(&self, env: &Environment) -> Result<(), FrameworkError> {
            self.0.shutdown(env)
        }
    }
    impl Service for ServiceRecorder {
        fn operate(
            &self,
            _request: Arc<dyn crate::request::Request>,
            _response: Arc<dyn crate::response::Response>,
        ) -> bool {
            true
        }
    }

    fn recorder(
        id: ComponentId,
        label: &'static str,
        log: &EventLog,
        fail_on: Option<&'static str>,
    ) -> Recorder {
        Recorder {
            id,
            label,
            log: Arc::clone(log),
            fail_on,
        }
    }

    #[test]
    fn test_lifecycle_total_order() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        server.add_resource(Arc::new(recorder(301, "r2", &log, None)));
        server.add_service(Arc::new(ServiceRecorder(recorder(302, "s1", &log, None))));

        server.setup().unwrap();
        server.start().unwrap();
        server.shutdown().unwrap();

        let events = log.lock().clone();
        assert_eq!(
            events,
            vec![
                "r1:setup", "r2:setup", "s1:setup", //
                "r1:start", "r2:start", "s1:start", //
                "s1:shutdown", "r2:shutdown", "r1:shutdown",
            ]
        );
    }

    #[test]
    fn test_setup_failure_short_circuits_and_unwinds() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        server.add_resource(Arc::new(recorder(301, "bad", &log, Some("setup"))));
        server.add_resource(Arc::new(recorder(302, "r3", &log, None)));

        assert!(server.setup().is_err());
        let events = log.lock().clone();
        // r3 never set up; shutdown visited everything in reverse order
        assert_eq!(
            events,
            vec![
                "r1:setup",
                "bad:setup",
                "r3:shutdown",
                "bad:shutdown",
                "r1:shutdown",
            ]
        );
    }

    #[test]
    fn test_start_runs_setup_first() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        server.start().unwrap();
        assert_eq!(log.lock().clone(), vec!["r1:setup", "r1:start"]);
    }

    #[test]
    fn test_setup_idempotent() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        server.setup().unwrap();
        server.setup().unwrap();
        assert_eq!(log.lock().clone(), vec!["r1:setup"]);
    }

    #[test]
    fn test_shutdown_never_short_circuits() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        server.add_resource(Arc::new(recorder(301, "bad", &log, Some("shutdown"))));
        server.setup().unwrap();
        assert!(server.shutdown().is_err());
        let events = log.lock().clone();
        assert_eq!(
            events,
            vec!["r1:setup", "bad:setup", "bad:shutdown", "r1:shutdown"]
        );
    }

    #[test]
    fn test_find_typed_component() {
        let server = server();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        server.add_resource(Arc::new(recorder(300, "r1", &log, None)));
        assert!(server.find_resource::<Recorder>().is_some());
        assert!(server.find_service::<ServiceRecorder>().is_none());
    }

    #[test]
    fn test_core_components_register() {
        let configuration = Arc::new(
            Configuration::from_str(
                "",
                "[ipc_endpoint]\ndatabase_name = \"shale\"\n",
            )
            .unwrap(),
        );
        let server = Server::new(BootMode::DatabaseServer, configuration);
        add_core_components(&server);
        assert!(server.find_resource::<StatusResource>().is_some());
        assert!(server.find_resource::<SessionResource>().is_some());
        assert!(server.find_service::<RoutingService>().is_some());
        assert!(server
            .find_service_by_id(crate::ids::SERVICE_ID_ROUTING)
            .is_some());
    }
}
