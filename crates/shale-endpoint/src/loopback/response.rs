//! Buffered response for the loopback endpoint.
//!
//! Everything a service writes is kept in memory for the caller to
//! inspect: body head, body, error record, and per-channel committed
//! writes. Completion is observable across threads so callers can wait
//! for services that finish a response asynchronously.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use shale_framework::proto::DiagnosticsRecord;
use shale_framework::response::{
    BlobInfo, DataChannel, Response, ResponseError, ResponseState, Writer, UNKNOWN_SESSION_ID,
};

/// Writer buffering bytes until committed into its channel.
pub struct LoopbackWriter {
    buffer: Mutex<Vec<u8>>,
    committed: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Writer for LoopbackWriter {
    fn write(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.buffer.lock().extend_from_slice(data);
        Ok(())
    }

    fn commit(&self) -> Result<(), ResponseError> {
        let mut buffer = self.buffer.lock();
        if !buffer.is_empty() {
            self.committed.lock().push(std::mem::take(&mut *buffer));
        }
        Ok(())
    }
}

/// Named in-memory data channel.
pub struct LoopbackDataChannel {
    name: String,
    max_writer_count: usize,
    writers: Mutex<Vec<Arc<LoopbackWriter>>>,
    committed: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl LoopbackDataChannel {
    fn new(name: &str, max_writer_count: usize) -> Self {
        LoopbackDataChannel {
            name: name.to_string(),
            max_writer_count,
            writers: Mutex::new(Vec::new()),
            committed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chunks committed so far, in commit order.
    pub fn committed_data(&self) -> Vec<Vec<u8>> {
        self.committed.lock().clone()
    }

    fn release_all_writers(&self) {
        self.writers.lock().clear();
    }
}

impl DataChannel for LoopbackDataChannel {
    fn acquire(&self) -> Result<Arc<dyn Writer>, ResponseError> {
        let mut writers = self.writers.lock();
        if writers.len() >= self.max_writer_count {
            return Err(ResponseError::Io(format!(
                "writer limit ({}) reached on channel '{}'",
                self.max_writer_count, self.name
            )));
        }
        let writer = Arc::new(LoopbackWriter {
            buffer: Mutex::new(Vec::new()),
            committed: Arc::clone(&self.committed),
        });
        writers.push(Arc::clone(&writer));
        Ok(writer)
    }

    fn release(&self, writer: Arc<dyn Writer>) -> Result<(), ResponseError> {
        let target = Arc::as_ptr(&writer) as *const ();
        let mut writers = self.writers.lock();
        let before = writers.len();
        // uncommitted data in the released writer is discarded
        writers.retain(|held| Arc::as_ptr(held) as *const () != target);
        if writers.len() == before {
            return Err(ResponseError::ChannelNotFound);
        }
        Ok(())
    }
}

/// Buffered response handed out by the loopback endpoint.
pub struct LoopbackResponse {
    session_id: AtomicU64,
    state: ResponseState,
    cancel: AtomicBool,
    body_head: Mutex<Option<Vec<u8>>>,
    body: Mutex<Option<Vec<u8>>>,
    error: Mutex<Option<DiagnosticsRecord>>,
    channels: Mutex<FxHashMap<String, Arc<LoopbackDataChannel>>>,
    blobs: Mutex<Vec<BlobInfo>>,
    completion_mutex: Mutex<bool>,
    completion_cv: Condvar,
}

impl LoopbackResponse {
    pub fn new() -> Self {
        LoopbackResponse {
            session_id: AtomicU64::new(UNKNOWN_SESSION_ID),
            state: ResponseState::new(),
            cancel: AtomicBool::new(false),
            body_head: Mutex::new(None),
            body: Mutex::new(None),
            error: Mutex::new(None),
            channels: Mutex::new(FxHashMap::default()),
            blobs: Mutex::new(Vec::new()),
            completion_mutex: Mutex::new(false),
            completion_cv: Condvar::new(),
        }
    }

    /// The session id recorded by the service.
    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    /// The body head, when the streamed form was used.
    pub fn body_head_data(&self) -> Option<Vec<u8>> {
        self.body_head.lock().clone()
    }

    /// The response body, when one was sent.
    pub fn body_data(&self) -> Option<Vec<u8>> {
        self.body.lock().clone()
    }

    /// The diagnostics record, when the response ended in an error.
    pub fn error_record(&self) -> Option<DiagnosticsRecord> {
        self.error.lock().clone()
    }

    /// Committed chunks of a named channel.
    pub fn channel_data(&self, name: &str) -> Option<Vec<Vec<u8>>> {
        self.channels
            .lock()
            .get(name)
            .map(|channel| channel.committed_data())
    }

    /// Blobs registered on this response.
    pub fn blobs(&self) -> Vec<BlobInfo> {
        self.blobs.lock().clone()
    }

    /// Signal cancellation for the job behind this response.
    ///
    /// The endpoint side of cooperative cancellation: services observe it
    /// through `check_cancel`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether a terminal event has been recorded.
    pub fn completed(&self) -> bool {
        self.state.completed()
    }

    /// Block until the terminal event, or the timeout. Returns whether the
    /// response completed.
    pub fn wait_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completion_mutex.lock();
        while !*completed {
            if self
                .completion_cv
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                break;
            }
        }
        *completed
    }

    fn notify_completion(&self) {
        let mut completed = self.completion_mutex.lock();
        *completed = true;
        self.completion_cv.notify_all();
    }
}

impl Default for LoopbackResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl Response for LoopbackResponse {
    fn set_session_id(&self, id: u64) {
        self.session_id.store(id, Ordering::Release);
    }

    fn body_head(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.state.accept_body_head()?;
        *self.body_head.lock() = Some(data.to_vec());
        Ok(())
    }

    fn body(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.state.accept_terminal()?;
        *self.body.lock() = Some(data.to_vec());
        self.notify_completion();
        Ok(())
    }

    fn error(&self, record: DiagnosticsRecord) {
        if self.state.accept_terminal().is_err() {
            tracing::warn!("error reported on an already completed response");
            return;
        }
        *self.error.lock() = Some(record);
        self.notify_completion();
    }

    fn acquire_channel(
        &self,
        name: &str,
        max_writer_count: usize,
    ) -> Result<Arc<dyn DataChannel>, ResponseError> {
        let mut channels = self.channels.lock();
        if channels.contains_key(name) {
            return Err(ResponseError::ChannelAlreadyAcquired(name.to_string()));
        }
        let channel = Arc::new(LoopbackDataChannel::new(name, max_writer_count));
        channels.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> Result<(), ResponseError> {
        let target = Arc::as_ptr(&channel) as *const ();
        let channels = self.channels.lock();
        let held = channels
            .values()
            .find(|held| Arc::as_ptr(held) as *const () == target)
            .cloned();
        match held {
            Some(held) => {
                held.release_all_writers();
                Ok(())
            }
            None => Err(ResponseError::ChannelNotFound),
        }
    }

    fn check_cancel(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn add_blob(&self, blob: BlobInfo) -> Result<(), ResponseError> {
        if self.state.completed() {
            return Err(ResponseError::BlobAfterCompletion);
        }
        let mut blobs = self.blobs.lock();
        if blobs
            .iter()
            .any(|held| held.channel_name() == blob.channel_name())
        {
            return Err(ResponseError::BlobAlreadyExists(
                blob.channel_name().to_string(),
            ));
        }
        blobs.push(blob);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
