//! Echo service: the request-execution stand-in.
//!
//! Mimics the shape of a real execution engine without any query
//! processing: each request is dispatched onto the service's own task
//! scheduler, and the task completes the response with the request
//! payload echoed back (prefixed by the `echo.prefix` session variable
//! when one is set). Cancellation is observed cooperatively before the
//! reply is produced.

use std::sync::Arc;

use parking_lot::Mutex;

use shale_framework::component::{Component, ComponentId, Service};
use shale_framework::environment::Environment;
use shale_framework::error::FrameworkError;
use shale_framework::ids;
use shale_framework::proto::{DiagnosticCode, DiagnosticsRecord};
use shale_framework::request::Request;
use shale_framework::response::Response;
use shale_framework::session::variable::{
    SessionVariableDeclaration, VariableType, VariableValue,
};
use shale_framework::session::SessionResource;
use shale_framework::Section;
use shale_scheduler::{BasicTask, Ratio, ScheduleOption, SchedulerConfig, TaskScheduler};

/// Session variable naming an optional reply prefix.
pub const ECHO_PREFIX_VARIABLE: &str = "echo.prefix";

type Scheduler = TaskScheduler<BasicTask>;

/// Service echoing request payloads through a task scheduler.
pub struct EchoService {
    scheduler: Mutex<Option<Scheduler>>,
}

impl EchoService {
    pub fn new() -> Self {
        EchoService {
            scheduler: Mutex::new(None),
        }
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for EchoService {
    fn id(&self) -> ComponentId {
        ids::SERVICE_ID_SQL
    }

    fn label(&self) -> &'static str {
        "echo_service"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        if let Some(session) = env.find_resource::<SessionResource>() {
            session
                .variable_declarations()
                .declare(SessionVariableDeclaration::new(
                    ECHO_PREFIX_VARIABLE,
                    VariableType::String,
                    VariableValue::Unset,
                ));
        }
        Ok(())
    }

    fn start(&self, env: &Environment) -> Result<(), FrameworkError> {
        let mut config = SchedulerConfig::default();
        if let Some(section) = env.configuration().section("scheduler") {
            apply_scheduler_section(&mut config, &section)?;
        }
        tracing::info!(%config, "starting the echo service scheduler");
        let scheduler = Scheduler::new(config);
        scheduler.start();
        *self.scheduler.lock() = Some(scheduler);
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        Ok(())
    }
}

impl Service for EchoService {
    fn operate(&self, request: Arc<dyn Request>, response: Arc<dyn Response>) -> bool {
        let guard = self.scheduler.lock();
        let Some(scheduler) = guard.as_ref() else {
            response.error(DiagnosticsRecord::new(
                DiagnosticCode::IllegalState,
                "echo service is not started",
            ));
            return false;
        };
        let payload = request.payload().to_vec();
        let prefix = match request.session_variable_set().get(ECHO_PREFIX_VARIABLE) {
            Some(VariableValue::String(prefix)) => prefix.into_bytes(),
            _ => Vec::new(),
        };
        scheduler.schedule(
            BasicTask::new(move |_ctx| {
                if response.check_cancel() {
                    response.error(DiagnosticsRecord::new(
                        DiagnosticCode::OperationCanceled,
                        "the request was canceled",
                    ));
                    return;
                }
                let mut reply = prefix.clone();
                reply.extend_from_slice(&payload);
                if let Err(error) = response.body(&reply) {
                    tracing::warn!(%error, "failed to send the echo reply");
                }
            }),
            ScheduleOption::default(),
        );
        true
    }
}

fn apply_scheduler_section(
    config: &mut SchedulerConfig,
    section: &Section<'_>,
) -> Result<(), FrameworkError> {
    if let Some(value) = section.get::<usize>("thread_count")? {
        config.thread_count = value;
    }
    if let Some(value) = section.get::<bool>("stealing_enabled")? {
        config.stealing_enabled = value;
    }
    if let Some(value) = section.get::<usize>("stealing_wait")? {
        config.stealing_wait = value;
    }
    if let Some(value) = section.get::<u64>("task_polling_wait")? {
        config.task_polling_wait = value;
    }
    if let Some(value) = section.get::<bool>("busy_worker")? {
        config.busy_worker = value;
    }
    if let Some(value) = section.get::<u64>("watcher_interval")? {
        config.watcher_interval = value;
    }
    if let Some(value) = section.get::<usize>("worker_try_count")? {
        config.worker_try_count = value;
    }
    if let Some(value) = section.get::<u64>("worker_suspend_timeout")? {
        config.worker_suspend_timeout = value;
    }
    if let Some(value) = section.get::<String>("ratio_check_local_first")? {
        config.ratio_check_local_first = parse_ratio(&value)?;
    }
    Ok(())
}

/// Parse a `N/M` ratio string from the configuration.
fn parse_ratio(value: &str) -> Result<Ratio, FrameworkError> {
    let parsed = value.split_once('/').and_then(|(numerator, denominator)| {
        let numerator = numerator.trim().parse::<u64>().ok()?;
        let denominator = denominator.trim().parse::<u64>().ok()?;
        if denominator == 0 || numerator >= denominator {
            return None;
        }
        Some(Ratio::new(numerator, denominator))
    });
    parsed.ok_or_else(|| {
        FrameworkError::Component(format!(
            "ratio_check_local_first must be a rational in [0, 1), got '{value}'"
        ))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ratio() {
        let ratio = parse_ratio("1/2").unwrap();
        assert_eq!(ratio.numerator(), 1);
        assert_eq!(ratio.denominator(), 2);
        assert!(parse_ratio("3/2").is_err());
        assert!(parse_ratio("1/0").is_err());
        assert!(parse_ratio("half").is_err());
    }
}
