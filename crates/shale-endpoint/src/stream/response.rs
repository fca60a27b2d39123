//! Response object writing framed replies back onto the session socket.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use shale_framework::proto::{
    self, DiagnosticsRecord, PayloadType, ResponseHeader,
};
use shale_framework::response::{
    BlobInfo, DataChannel, Response, ResponseError, ResponseState, Writer, UNKNOWN_SESSION_ID,
};

use crate::stream::socket::{frame, StreamSocket};

/// Map of in-flight responses by wire slot, shared with the session
/// worker so cancel commands can reach them.
pub(crate) type SlotMap = Arc<Mutex<FxHashMap<u16, Arc<StreamResponse>>>>;

/// Writer pushing committed chunks as result-set payload frames.
pub struct StreamWriter {
    socket: Arc<StreamSocket>,
    slot: u16,
    writer_id: u8,
    buffer: Mutex<Vec<u8>>,
}

impl Writer for StreamWriter {
    fn write(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.buffer.lock().extend_from_slice(data);
        Ok(())
    }

    fn commit(&self) -> Result<(), ResponseError> {
        let chunk = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if chunk.is_empty() {
            return Ok(());
        }
        self.socket
            .send_result_set_payload(self.slot, self.writer_id, &chunk)
            .map_err(|e| ResponseError::Io(e.to_string()))
    }
}

/// Data channel multiplexing writers over one result-set stream.
pub struct StreamDataChannel {
    socket: Arc<StreamSocket>,
    slot: u16,
    name: String,
    max_writer_count: usize,
    next_writer_id: AtomicU8,
    writers: Mutex<Vec<Arc<StreamWriter>>>,
}

impl StreamDataChannel {
    fn new(socket: Arc<StreamSocket>, slot: u16, name: &str, max_writer_count: usize) -> Self {
        StreamDataChannel {
            socket,
            slot,
            name: name.to_string(),
            max_writer_count,
            next_writer_id: AtomicU8::new(0),
            writers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn release_all_writers(&self) {
        self.writers.lock().clear();
    }
}

impl DataChannel for StreamDataChannel {
    fn acquire(&self) -> Result<Arc<dyn Writer>, ResponseError> {
        let mut writers = self.writers.lock();
        if writers.len() >= self.max_writer_count {
            return Err(ResponseError::Io(format!(
                "writer limit ({}) reached on channel '{}'",
                self.max_writer_count, self.name
            )));
        }
        let writer = Arc::new(StreamWriter {
            socket: Arc::clone(&self.socket),
            slot: self.slot,
            writer_id: self.next_writer_id.fetch_add(1, Ordering::Relaxed),
            buffer: Mutex::new(Vec::new()),
        });
        writers.push(Arc::clone(&writer));
        Ok(writer)
    }

    fn release(&self, writer: Arc<dyn Writer>) -> Result<(), ResponseError> {
        let target = Arc::as_ptr(&writer) as *const ();
        let mut writers = self.writers.lock();
        let before = writers.len();
        writers.retain(|held| Arc::as_ptr(held) as *const () != target);
        if writers.len() == before {
            return Err(ResponseError::ChannelNotFound);
        }
        Ok(())
    }
}

/// Response for one stream request slot.
pub struct StreamResponse {
    socket: Arc<StreamSocket>,
    slot: u16,
    session_id: AtomicU64,
    state: ResponseState,
    cancel: AtomicBool,
    channels: Mutex<FxHashMap<String, Arc<StreamDataChannel>>>,
    blobs: Mutex<Vec<BlobInfo>>,
    slots: SlotMap,
}

impl StreamResponse {
    pub(crate) fn new(socket: Arc<StreamSocket>, slot: u16, slots: SlotMap) -> Arc<Self> {
        let response = Arc::new(StreamResponse {
            socket,
            slot,
            session_id: AtomicU64::new(UNKNOWN_SESSION_ID),
            state: ResponseState::new(),
            cancel: AtomicBool::new(false),
            channels: Mutex::new(FxHashMap::default()),
            blobs: Mutex::new(Vec::new()),
            slots: Arc::clone(&slots),
        });
        slots.lock().insert(slot, Arc::clone(&response));
        response
    }

    /// Signal cancellation for the job behind this response.
    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn header(&self, payload_type: PayloadType) -> ResponseHeader {
        ResponseHeader {
            session_id: self.session_id.load(Ordering::Acquire),
            payload_type: payload_type as i32,
        }
    }

    // a completed response no longer accepts cancel commands
    fn finish(&self) {
        self.slots.lock().remove(&self.slot);
    }
}

impl Response for StreamResponse {
    fn set_session_id(&self, id: u64) {
        self.session_id.store(id, Ordering::Release);
    }

    fn body_head(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.state.accept_body_head()?;
        let framed = proto::encode_response(&self.header(PayloadType::ServiceResult), data);
        self.socket
            .send_response(frame::RESPONSE_SESSION_BODYHEAD, self.slot, &framed)
            .map_err(|e| ResponseError::Io(e.to_string()))
    }

    fn body(&self, data: &[u8]) -> Result<(), ResponseError> {
        self.state.accept_terminal()?;
        let framed = proto::encode_response(&self.header(PayloadType::ServiceResult), data);
        let result = self
            .socket
            .send_response(frame::RESPONSE_SESSION_PAYLOAD, self.slot, &framed)
            .map_err(|e| ResponseError::Io(e.to_string()));
        self.finish();
        result
    }

    fn error(&self, record: DiagnosticsRecord) {
        if self.state.accept_terminal().is_err() {
            tracing::warn!(
                slot = self.slot,
                "error reported on an already completed response"
            );
            return;
        }
        let body = proto::encode_diagnostics_record(&record);
        let framed = proto::encode_response(&self.header(PayloadType::ServerDiagnostics), &body);
        if let Err(e) =
            self.socket
                .send_response(frame::RESPONSE_SESSION_PAYLOAD, self.slot, &framed)
        {
            tracing::warn!(slot = self.slot, error = %e, "failed to send diagnostics record");
        }
        self.finish();
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
        let channel = Arc::new(StreamDataChannel::new(
            Arc::clone(&self.socket),
            self.slot,
            name,
            max_writer_count,
        ));
        self.socket
            .send_response(frame::RESPONSE_RESULT_SET_HELLO, self.slot, name.as_bytes())
            .map_err(|e| ResponseError::Io(e.to_string()))?;
        channels.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    fn release_channel(&self, channel: Arc<dyn DataChannel>) -> Result<(), ResponseError> {
        let target = Arc::as_ptr(&channel) as *const ();
        let held = {
            let mut channels = self.channels.lock();
            let name = channels
                .iter()
                .find(|(_, held)| Arc::as_ptr(held) as *const () == target)
                .map(|(name, _)| name.clone());
            name.and_then(|name| channels.remove(&name))
        };
        let Some(held) = held else {
            return Err(ResponseError::ChannelNotFound);
        };
        held.release_all_writers();
        self.socket
            .send_response(
                frame::RESPONSE_RESULT_SET_BYE,
                self.slot,
                held.name().as_bytes(),
            )
            .map_err(|e| ResponseError::Io(e.to_string()))
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

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("slot", &self.slot)
            .field("completed", &self.state.completed())
            .finish()
    }
}
