//! Framed socket for the stream endpoint.
//!
//! Frame layout on send: `[type: u8][slot: u16 LE][length: u32 LE]
//! [payload…]`; result-set payload frames carry an additional
//! `[writer: u8]` before the length. Requests from the client use the same
//! `[type][slot][length][payload]` shape.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Frame type codes.
pub mod frame {
    pub const REQUEST_SESSION_HELLO: u8 = 1;
    pub const REQUEST_SESSION_PAYLOAD: u8 = 2;
    pub const REQUEST_RESULT_SET_BYE_OK: u8 = 3;
    pub const REQUEST_SESSION_BYE: u8 = 4;

    pub const RESPONSE_SESSION_PAYLOAD: u8 = 1;
    pub const RESPONSE_RESULT_SET_PAYLOAD: u8 = 2;
    pub const RESPONSE_SESSION_HELLO_OK: u8 = 3;
    pub const RESPONSE_SESSION_HELLO_NG: u8 = 4;
    pub const RESPONSE_RESULT_SET_HELLO: u8 = 5;
    pub const RESPONSE_RESULT_SET_BYE: u8 = 6;
    pub const RESPONSE_SESSION_BODYHEAD: u8 = 7;
    /// Retained for old clients; new ones treat session end as implicit.
    pub const RESPONSE_SESSION_BYE_OK: u8 = 8;
}

/// Upper bound on a single frame payload (64 MiB). Guards against
/// allocation bombs from a broken peer.
const MAX_FRAME_PAYLOAD: u32 = 64 * 1024 * 1024;

/// One request frame received from the client.
#[derive(Debug)]
pub struct RequestFrame {
    pub frame_type: u8,
    pub slot: u16,
    pub payload: Vec<u8>,
}

/// A connected session socket with serialized writes.
pub struct StreamSocket {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    stream: TcpStream,
    peer: String,
    session_closed: AtomicBool,
}

impl StreamSocket {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(StreamSocket {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            stream,
            peer,
            session_closed: AtomicBool::new(false),
        })
    }

    /// Peer address string, e.g. `127.0.0.1:54321`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Receive the next request frame.
    ///
    /// Returns `Ok(None)` on clean connection close.
    pub fn recv(&self) -> std::io::Result<Option<RequestFrame>> {
        let mut reader = self.reader.lock();
        let mut head = [0u8; 7];
        match reader.read_exact(&mut head[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        reader.read_exact(&mut head[1..])?;
        let frame_type = head[0];
        let slot = u16::from_le_bytes([head[1], head[2]]);
        let length = u32::from_le_bytes([head[3], head[4], head[5], head[6]]);
        if length > MAX_FRAME_PAYLOAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame payload too large: {length} bytes"),
            ));
        }
        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;
        Ok(Some(RequestFrame {
            frame_type,
            slot,
            payload,
        }))
    }

    /// Send a session-level response frame.
    pub fn send_response(
        &self,
        frame_type: u8,
        slot: u16,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(&[frame_type])?;
        writer.write_all(&slot.to_le_bytes())?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(payload)?;
        writer.flush()
    }

    /// Send a result-set payload frame for one writer.
    pub fn send_result_set_payload(
        &self,
        slot: u16,
        writer_id: u8,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(&[frame::RESPONSE_RESULT_SET_PAYLOAD])?;
        writer.write_all(&slot.to_le_bytes())?;
        writer.write_all(&[writer_id])?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(payload)?;
        writer.flush()
    }

    /// Mark the session as finished; the worker loop exits after the
    /// in-flight frame.
    pub fn close_session(&self) {
        self.session_closed.store(true, Ordering::Release);
    }

    pub fn is_session_closed(&self) -> bool {
        self.session_closed.load(Ordering::Acquire)
    }

    /// Tear the connection down, unblocking a worker parked in `recv`.
    pub fn disconnect(&self) {
        self.close_session();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSocket")
            .field("peer", &self.peer)
            .field("session_closed", &self.is_session_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn socket_pair() -> (StreamSocket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (StreamSocket::new(server).unwrap(), client)
    }

    #[test]
    fn test_frame_round_trip() {
        let (server, mut client) = socket_pair();

        // client sends [type][slot][len][payload]
        client.write_all(&[frame::REQUEST_SESSION_PAYLOAD]).unwrap();
        client.write_all(&7u16.to_le_bytes()).unwrap();
        client.write_all(&5u32.to_le_bytes()).unwrap();
        client.write_all(b"hello").unwrap();

        let received = server.recv().unwrap().unwrap();
        assert_eq!(received.frame_type, frame::REQUEST_SESSION_PAYLOAD);
        assert_eq!(received.slot, 7);
        assert_eq!(received.payload, b"hello");

        // server sends a response frame back
        server
            .send_response(frame::RESPONSE_SESSION_PAYLOAD, 7, b"world")
            .unwrap();
        let mut head = [0u8; 7];
        client.read_exact(&mut head).unwrap();
        assert_eq!(head[0], frame::RESPONSE_SESSION_PAYLOAD);
        assert_eq!(u16::from_le_bytes([head[1], head[2]]), 7);
        assert_eq!(u32::from_le_bytes([head[3], head[4], head[5], head[6]]), 5);
        let mut payload = [0u8; 5];
        client.read_exact(&mut payload).unwrap();
        assert_eq!(&payload, b"world");
    }

    #[test]
    fn test_result_set_frame_carries_writer_byte() {
        let (server, mut client) = socket_pair();
        server.send_result_set_payload(3, 2, b"rows").unwrap();
        let mut head = [0u8; 8];
        client.read_exact(&mut head).unwrap();
        assert_eq!(head[0], frame::RESPONSE_RESULT_SET_PAYLOAD);
        assert_eq!(u16::from_le_bytes([head[1], head[2]]), 3);
        assert_eq!(head[3], 2);
        assert_eq!(u32::from_le_bytes([head[4], head[5], head[6], head[7]]), 4);
    }

    #[test]
    fn test_clean_close_yields_none() {
        let (server, client) = socket_pair();
        drop(client);
        assert!(server.recv().unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let (server, mut client) = socket_pair();
        client.write_all(&[frame::REQUEST_SESSION_PAYLOAD]).unwrap();
        client.write_all(&0u16.to_le_bytes()).unwrap();
        client
            .write_all(&(MAX_FRAME_PAYLOAD + 1).to_le_bytes())
            .unwrap();
        assert!(server.recv().is_err());
    }
}
