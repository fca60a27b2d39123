//! shaled: the shale database service runtime server.
//!
//! Loads the layered configuration, assembles the server from the core
//! components plus the echo service and the stream endpoint, and drives
//! the published status through its life: ready after setup, activated
//! after start, deactivating on the first shutdown request, deactivated
//! once every component wound down.

mod echo;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use shale_endpoint::StreamEndpoint;
use shale_framework::component::BootMode;
use shale_framework::server::{add_core_components, Server};
use shale_framework::status::{ShutdownKind, State, StatusResource};
use shale_framework::Configuration;

use crate::echo::EchoService;

/// Built-in defaults; a user file overrides individual keys.
const DEFAULT_CONFIGURATION: &str = r#"
[ipc_endpoint]
database_name = "shale"
threads = 104
datachannel_buffer_size = 64
max_datachannel_buffers = 16
admin_sessions = 1

[stream_endpoint]
enabled = true
port = 12345
threads = 104

[session]
enable_timeout = false
refresh_timeout = 300
max_refresh_timeout = 86400

[scheduler]
thread_count = 5
stealing_enabled = true
stealing_wait = 1
task_polling_wait = 0
busy_worker = false
watcher_interval = 1000
worker_try_count = 1000
worker_suspend_timeout = 1000000
ratio_check_local_first = "1/10"

[system]
pid_directory = "/tmp"
"#;

#[derive(Debug, Parser)]
#[command(name = "shaled", about = "shale database service runtime server")]
struct Args {
    /// Path to the configuration file.
    #[arg(long)]
    conf: Option<PathBuf>,

    /// Override the stream endpoint port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let configuration = match load_configuration(&args) {
        Ok(configuration) => Arc::new(configuration),
        Err(error) => {
            tracing::error!(%error, "cannot load the configuration");
            return 1;
        }
    };

    let server = Server::new(BootMode::DatabaseServer, configuration);
    add_core_components(&server);
    server.add_service(Arc::new(EchoService::new()));
    server.add_endpoint(Arc::new(StreamEndpoint::new()));

    let status = server
        .find_resource::<StatusResource>()
        .expect("status resource is registered by the core components")
        .core();

    if let Err(error) = server.setup() {
        status.set_whole(State::BootError);
        tracing::error!(%error, "server application framework setup failed");
        return 1;
    }
    status.set_whole(State::Ready);

    if let Err(error) = server.start() {
        status.set_whole(State::BootError);
        tracing::error!(%error, "server application framework start failed");
        let _ = server.shutdown();
        return 1;
    }
    status.set_whole(State::Activated);
    tracing::info!(
        database = status.database_name(),
        pid = status.pid(),
        "shaled is ready"
    );

    {
        let status = Arc::clone(&status);
        if let Err(error) = ctrlc::set_handler(move || {
            status.request_shutdown(ShutdownKind::Graceful);
        }) {
            tracing::warn!(%error, "cannot register the signal handler");
        }
    }

    let requested = status.wait_for_shutdown(None);
    tracing::info!(?requested, "shutdown requested");
    status.set_whole(State::Deactivating);
    let result = server.shutdown();
    // the status resource publishes the deactivated state on its own
    // shutdown step
    match result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(%error, "shutdown finished with failures");
            1
        }
    }
}

fn load_configuration(args: &Args) -> Result<Configuration, shale_framework::ConfigError> {
    let mut configuration = match &args.conf {
        Some(path) => Configuration::from_file(path, DEFAULT_CONFIGURATION)?,
        None => Configuration::from_str("", DEFAULT_CONFIGURATION)?,
    };
    if let Some(directory) = configuration.directory() {
        configuration.set_base_path(directory);
    }
    if let Some(port) = args.port {
        configuration.set("stream_endpoint", "port", &port.to_string());
    }
    Ok(configuration)
}
