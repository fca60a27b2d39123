//! Stream endpoint component: listener and session slot management.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use shale_framework::component::{Component, ComponentId, Endpoint};
use shale_framework::environment::Environment;
use shale_framework::error::FrameworkError;
use shale_framework::ids;
use shale_framework::proto::{DiagnosticCode, DiagnosticsRecord};
use shale_framework::proto;
use shale_framework::request::DatabaseInfo;
use shale_framework::session::SessionResource;
use shale_framework::status::StatusResource;

use crate::stream::socket::{frame, StreamSocket};
use crate::stream::worker::{StreamWorker, WorkerShared};

const DEFAULT_PORT: u16 = 12345;
const DEFAULT_MAX_SESSIONS: usize = 104;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fixed pool of session slot indices; exhaustion declines new sessions.
struct SlotPool {
    slots: Mutex<Vec<bool>>,
}

impl SlotPool {
    fn new(capacity: usize) -> Self {
        SlotPool {
            slots: Mutex::new(vec![false; capacity]),
        }
    }

    fn acquire(&self) -> Option<usize> {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(|taken| !*taken)?;
        slots[index] = true;
        Some(index)
    }

    fn release(&self, index: usize) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(index) {
            *slot = false;
        }
    }
}

struct ListenerState {
    thread: Option<JoinHandle<()>>,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

struct SessionHandle {
    socket: Arc<StreamSocket>,
    thread: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct StreamConfig {
    enabled: bool,
    port: u16,
    max_sessions: usize,
}

/// TCP stream endpoint.
///
/// Listens on the configured port; each accepted connection becomes one
/// session serviced by a dedicated worker thread, up to the configured
/// number of concurrent sessions.
pub struct StreamEndpoint {
    config: Mutex<Option<StreamConfig>>,
    listener: Mutex<Option<ListenerState>>,
    shutdown: Arc<AtomicBool>,
    bound_port: AtomicU16,
}

impl StreamEndpoint {
    pub fn new() -> Self {
        StreamEndpoint {
            config: Mutex::new(None),
            listener: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_port: AtomicU16::new(0),
        }
    }

    /// The port actually bound; differs from the configured one when the
    /// configuration asked for an OS-assigned port.
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::Acquire)
    }
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for StreamEndpoint {
    fn id(&self) -> ComponentId {
        ids::ENDPOINT_ID_STREAM
    }

    fn label(&self) -> &'static str {
        "stream_endpoint"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let mut enabled = true;
        let mut port = DEFAULT_PORT;
        let mut max_sessions = DEFAULT_MAX_SESSIONS;
        if let Some(section) = env.configuration().section("stream_endpoint") {
            if let Some(value) = section.get::<bool>("enabled")? {
                enabled = value;
            }
            if let Some(value) = section.get::<u16>("port")? {
                port = value;
            }
            if let Some(value) = section.get::<u32>("threads")? {
                max_sessions = value as usize;
            }
        }
        *self.config.lock() = Some(StreamConfig {
            enabled,
            port,
            max_sessions,
        });
        Ok(())
    }

    fn start(&self, env: &Environment) -> Result<(), FrameworkError> {
        let config = self
            .config
            .lock()
            .clone()
            .ok_or_else(|| FrameworkError::Component("stream endpoint is not set up".into()))?;
        if !config.enabled {
            tracing::info!("stream endpoint is disabled");
            return Ok(());
        }
        let routing = env.service_by_id(ids::SERVICE_ID_ROUTING).ok_or_else(|| {
            FrameworkError::Component("routing service is not registered".to_string())
        })?;
        let session = env.find_resource::<SessionResource>().ok_or_else(|| {
            FrameworkError::Component("session resource is not registered".to_string())
        })?;
        let status = env
            .find_resource::<StatusResource>()
            .map(|resource| resource.core());
        if let Some(status) = &status {
            status.set_maximum_sessions(config.max_sessions);
        }
        let database_name = env
            .configuration()
            .section("ipc_endpoint")
            .and_then(|section| section.get::<String>("database_name").ok().flatten())
            .unwrap_or_default();

        let shared = Arc::new(WorkerShared {
            routing,
            database_info: Arc::new(DatabaseInfo::new(database_name)),
            container: session.container(),
            declarations: session.variable_declarations(),
            status,
        });

        let listener = TcpListener::bind(("0.0.0.0", config.port))?;
        let bound_port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        self.bound_port.store(bound_port, Ordering::Release);
        tracing::info!(port = bound_port, "stream endpoint listening");

        self.shutdown.store(false, Ordering::Release);
        let shutdown = Arc::clone(&self.shutdown);
        let sessions: Arc<Mutex<Vec<SessionHandle>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_sessions = Arc::clone(&sessions);
        let pool = Arc::new(SlotPool::new(config.max_sessions));

        let thread = std::thread::spawn(move || {
            accept_loop(listener, shared, accept_sessions, pool, shutdown);
        });
        *self.listener.lock() = Some(ListenerState {
            thread: Some(thread),
            sessions,
        });
        Ok(())
    }

    fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
        self.shutdown.store(true, Ordering::Release);
        let state = self.listener.lock().take();
        let Some(mut state) = state else {
            return Ok(());
        };
        if let Some(thread) = state.thread.take() {
            let _ = thread.join();
        }
        let handles: Vec<SessionHandle> = state.sessions.lock().drain(..).collect();
        for handle in &handles {
            handle.socket.disconnect();
        }
        for handle in handles {
            let _ = handle.thread.join();
        }
        tracing::info!("stream endpoint stopped");
        Ok(())
    }
}

impl Endpoint for StreamEndpoint {}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<WorkerShared>,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
    pool: Arc<SlotPool>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                // reap finished sessions so their slots do not linger
                {
                    let mut held = sessions.lock();
                    held.retain(|handle| !handle.thread.is_finished());
                }
                let socket = match stream
                    .set_nonblocking(false)
                    .and_then(|_| StreamSocket::new(stream))
                {
                    Ok(socket) => Arc::new(socket),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to adopt a connection");
                        continue;
                    }
                };
                match pool.acquire() {
                    Some(slot_index) => {
                        tracing::debug!(peer = %peer, slot_index, "session accepted");
                        let worker = StreamWorker::new(Arc::clone(&shared), Arc::clone(&socket), slot_index);
                        let pool = Arc::clone(&pool);
                        let thread = std::thread::spawn(move || {
                            worker.run();
                            pool.release(slot_index);
                        });
                        sessions.lock().push(SessionHandle { socket, thread });
                    }
                    None => {
                        tracing::warn!(peer = %peer, "session limit reached, declining");
                        std::thread::spawn(move || decline(&socket));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::error!(error = %e, "stream endpoint accept failed");
                break;
            }
        }
    }
}

/// Answer the hello of an over-capacity connection with a decline.
fn decline(socket: &StreamSocket) {
    let hello_slot = match socket.recv() {
        Ok(Some(frame)) if frame.frame_type == frame::REQUEST_SESSION_HELLO => frame.slot,
        _ => 0,
    };
    let record = DiagnosticsRecord::new(
        DiagnosticCode::ResourceLimitReached,
        "the server has reached the maximum number of sessions",
    );
    let _ = socket.send_response(
        frame::RESPONSE_SESSION_HELLO_NG,
        hello_slot,
        &proto::encode_diagnostics_record(&record),
    );
    socket.disconnect();
}
