//! Framework-level error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Error raised by component lifecycle operations.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// A configuration lookup failed during setup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A component reported a failure with a message of its own.
    #[error("component failure: {0}")]
    Component(String),

    /// An I/O operation failed (binding a listener, touching a file).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
