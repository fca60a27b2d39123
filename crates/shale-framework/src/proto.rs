//! Framework wire header and diagnostics records.
//!
//! Every request and response carries a length-delimited protobuf header;
//! the service-level payload follows, also length-delimited on responses.
//! The header format is stable across both endpoints.

use prost::Message;
use thiserror::Error;

/// Error raised while encoding or decoding framed wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed wire message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("truncated wire message")]
    Truncated,
}

/// Header prefixed to every framed request.
#[derive(Clone, PartialEq, Message)]
pub struct RequestHeader {
    /// Target service id.
    #[prost(uint32, tag = "1")]
    pub service_id: u32,

    /// Session the request belongs to. Zero when the endpoint fills it in.
    #[prost(uint64, tag = "2")]
    pub session_id: u64,

    /// Out-of-band blob attachments referenced by channel name.
    #[prost(message, repeated, tag = "3")]
    pub blobs: Vec<BlobUnit>,
}

/// One blob attachment carried by a request header.
#[derive(Clone, PartialEq, Message)]
pub struct BlobUnit {
    #[prost(string, tag = "1")]
    pub channel_name: String,

    /// Filesystem location of the blob contents.
    #[prost(string, tag = "2")]
    pub path: String,

    /// Whether the file may be removed after the request completes.
    #[prost(bool, tag = "3")]
    pub temporary: bool,
}

/// Payload kind tag carried by response headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    Unknown = 0,
    /// The payload is a server diagnostics record.
    ServerDiagnostics = 1,
    /// The payload is a service-level body.
    ServiceResult = 2,
}

/// Header prefixed to every framed response.
#[derive(Clone, PartialEq, Message)]
pub struct ResponseHeader {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,

    #[prost(enumeration = "PayloadType", tag = "2")]
    pub payload_type: i32,
}

/// Diagnostic codes reported in server diagnostics records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DiagnosticCode {
    Unknown = 0,
    ServiceUnavailable = 1,
    InvalidRequest = 2,
    OperationCanceled = 3,
    ResourceLimitReached = 4,
    IoError = 5,
    IllegalState = 6,
    UnsupportedOperation = 7,
    AuthenticationError = 8,
}

/// A server diagnostics record reported to the client instead of a body.
#[derive(Clone, PartialEq, Message)]
pub struct DiagnosticsRecord {
    #[prost(enumeration = "DiagnosticCode", tag = "1")]
    pub code: i32,

    #[prost(string, tag = "2")]
    pub message: String,
}

impl DiagnosticsRecord {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        DiagnosticsRecord {
            code: code as i32,
            message: message.into(),
        }
    }

    pub fn diagnostic_code(&self) -> DiagnosticCode {
        DiagnosticCode::try_from(self.code).unwrap_or(DiagnosticCode::Unknown)
    }
}

/// Information a client presents when opening a session.
#[derive(Clone, PartialEq, Message)]
pub struct ClientInformation {
    /// Session label chosen by the client; may be empty.
    #[prost(string, tag = "1")]
    pub connection_label: String,

    /// Name of the connecting application; may be empty.
    #[prost(string, tag = "2")]
    pub application_name: String,
}

/// Cancel command routed to the endpoint broker.
#[derive(Clone, PartialEq, Message)]
pub struct CancelRequest {
    /// Local id (endpoint slot) of the job to cancel.
    #[prost(uint64, tag = "1")]
    pub local_id: u64,
}

// ---------------------------------------------------------------------------
// Length-delimited helpers
// ---------------------------------------------------------------------------

/// Encode a message with its length delimiter prefix.
pub fn encode_delimited(message: &impl Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.encoded_len() + 4);
    message
        .encode_length_delimited(&mut buf)
        .expect("vec write is infallible");
    buf
}

/// Split one length-delimited message off the front of `data`.
///
/// Returns the message bytes and the remainder.
fn split_delimited(data: &[u8]) -> Result<(&[u8], &[u8]), WireError> {
    let mut cursor = data;
    let len = prost::decode_length_delimiter(&mut cursor)?;
    if cursor.len() < len {
        return Err(WireError::Truncated);
    }
    Ok((&cursor[..len], &cursor[len..]))
}

/// Encode a diagnostics record as a response body.
pub fn encode_diagnostics_record(record: &DiagnosticsRecord) -> Vec<u8> {
    record.encode_to_vec()
}

/// Decode a diagnostics record from a response body whose header carries
/// `PayloadType::ServerDiagnostics`.
pub fn decode_diagnostics_record(body: &[u8]) -> Result<DiagnosticsRecord, WireError> {
    Ok(DiagnosticsRecord::decode(body)?)
}

/// Decode one length-delimited message off the front of `data`.
///
/// Returns the message and the remaining bytes.
pub fn decode_delimited<M: Message + Default>(data: &[u8]) -> Result<(M, &[u8]), WireError> {
    let (head, rest) = split_delimited(data)?;
    let message = M::decode(head)?;
    Ok((message, rest))
}

/// Decode the framework request header off the front of a wire payload.
///
/// Returns the header and the service-level body that follows it.
pub fn decode_request_header(payload: &[u8]) -> Result<(RequestHeader, &[u8]), WireError> {
    let (head, rest) = split_delimited(payload)?;
    let header = RequestHeader::decode(head)?;
    Ok((header, rest))
}

/// Build a framed request: delimited header followed by the service payload.
pub fn encode_request(header: &RequestHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = encode_delimited(header);
    buf.extend_from_slice(payload);
    buf
}

/// Build a framed response: delimited header followed by the delimited body.
pub fn encode_response(header: &ResponseHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = encode_delimited(header);
    prost::encode_length_delimiter(body.len(), &mut buf).expect("vec write is infallible");
    buf.extend_from_slice(body);
    buf
}

/// Decode a framed response into its header and body.
pub fn decode_response(data: &[u8]) -> Result<(ResponseHeader, &[u8]), WireError> {
    let (head, rest) = split_delimited(data)?;
    let header = ResponseHeader::decode(head)?;
    let (body, _trailer) = split_delimited(rest)?;
    Ok((header, body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
