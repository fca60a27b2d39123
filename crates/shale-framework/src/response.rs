//! Response contract implemented by endpoints.
//!
//! A response is single-use: exactly one terminal event — `body`, `error`,
//! or the stream form (`body_head` then `body` or `error`) — per response.
//! Channel acquisition and release are thread-safe; the terminal-event
//! methods of one response are mutually thread-unsafe and must be called
//! one at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::proto::DiagnosticsRecord;

/// Session id value before the endpoint learns the real one.
pub const UNKNOWN_SESSION_ID: u64 = u64::MAX;

/// Error raised by response and data channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    /// A terminal event was already recorded for this response.
    #[error("response already completed")]
    AlreadyCompleted,

    /// `body_head` was called twice.
    #[error("response head already sent")]
    HeadAlreadySent,

    /// A channel with the requested name is already acquired.
    #[error("data channel '{0}' already acquired")]
    ChannelAlreadyAcquired(String),

    /// The channel (or writer) does not belong to this response.
    #[error("data channel not found")]
    ChannelNotFound,

    /// A blob with the same channel name is already registered.
    #[error("blob '{0}' already registered")]
    BlobAlreadyExists(String),

    /// Blob registration after the terminal event.
    #[error("blob registered after response completion")]
    BlobAfterCompletion,

    /// The transport rejected the write.
    #[error("response write failed: {0}")]
    Io(String),
}

/// Out-of-band large binary attachment, referenced by channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    channel_name: String,
    path: PathBuf,
    temporary: bool,
}

impl BlobInfo {
    pub fn new(channel_name: impl Into<String>, path: PathBuf, temporary: bool) -> Self {
        BlobInfo {
            channel_name: channel_name.into(),
            path,
            temporary,
        }
    }

    /// Name of the blob channel, unique per response.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Location of the blob contents.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Whether the file may be removed once the response is delivered.
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

/// Writer attached to a data channel.
pub trait Writer: Send + Sync {
    /// Append bytes to the writer's buffer. Non-blocking.
    fn write(&self, data: &[u8]) -> Result<(), ResponseError>;

    /// Flush buffered bytes downstream as one unit.
    fn commit(&self) -> Result<(), ResponseError>;
}

/// A named output byte stream attached to a response, multiplexing
/// multiple writers.
pub trait DataChannel: Send + Sync {
    /// Acquire a new writer.
    fn acquire(&self) -> Result<Arc<dyn Writer>, ResponseError>;

    /// Release a writer. Uncommitted data may be discarded.
    fn release(&self, writer: Arc<dyn Writer>) -> Result<(), ResponseError>;
}

/// Response interface.
pub trait Response: Send + Sync {
    /// Record the session id to carry in the response header.
    fn set_session_id(&self, id: u64);

    /// Send the response body head, opening the streamed form.
    fn body_head(&self, data: &[u8]) -> Result<(), ResponseError>;

    /// Send the response body. Terminal.
    fn body(&self, data: &[u8]) -> Result<(), ResponseError>;

    /// Report an error with a diagnostics record. Terminal.
    ///
    /// After calling this to cancel a job, the job must not touch the
    /// request, the response, or the session resources any further.
    fn error(&self, record: DiagnosticsRecord);

    /// Retrieve the named output data channel. Thread-safe.
    fn acquire_channel(
        &self,
        name: &str,
        max_writer_count: usize,
    ) -> Result<Arc<dyn DataChannel>, ResponseError>;

    /// Release the data channel, releasing all of its writers. Thread-safe.
    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> Result<(), ResponseError>;

    /// Whether cancellation was requested for the job behind this response.
    ///
    /// After observing true the service must finish promptly by calling
    /// `error` with `OPERATION_CANCELED` and stop using the request,
    /// response, and session.
    fn check_cancel(&self) -> bool;

    /// Register an out-of-band blob for this response.
    fn add_blob(&self, blob: BlobInfo) -> Result<(), ResponseError>;
}

// ---------------------------------------------------------------------------
// Terminal-event state machine
// ---------------------------------------------------------------------------

const STATE_INITIAL: u8 = 0;
const STATE_HEAD_SENT: u8 = 1;
const STATE_COMPLETED: u8 = 2;

/// Tracks the single-use discipline of a response.
///
/// Valid terminal sequences are `{body}`, `{error}`, `{body_head, body}`,
/// and `{body_head, error}`; everything else is rejected.
#[derive(Debug)]
pub struct ResponseState {
    state: AtomicU8,
}

impl ResponseState {
    pub fn new() -> Self {
        ResponseState {
            state: AtomicU8::new(STATE_INITIAL),
        }
    }

    /// Record a `body_head` event.
    pub fn accept_body_head(&self) -> Result<(), ResponseError> {
        match self.state.compare_exchange(
            STATE_INITIAL,
            STATE_HEAD_SENT,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(STATE_HEAD_SENT) => Err(ResponseError::HeadAlreadySent),
            Err(_) => Err(ResponseError::AlreadyCompleted),
        }
    }

    /// Record a terminal `body` or `error` event.
    pub fn accept_terminal(&self) -> Result<(), ResponseError> {
        let previous = self.state.swap(STATE_COMPLETED, Ordering::AcqRel);
        if previous == STATE_COMPLETED {
            Err(ResponseError::AlreadyCompleted)
        } else {
            Ok(())
        }
    }

    /// Whether a terminal event has been recorded.
    pub fn completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_COMPLETED
    }

    /// Whether `body_head` has been recorded.
    pub fn head_sent(&self) -> bool {
        self.state.load(Ordering::Acquire) >= STATE_HEAD_SENT
    }
}

impl Default for ResponseState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
