//! Transport endpoints for the shale server runtime.
//!
//! An endpoint owns a transport, accepts client sessions, and turns each
//! framed message into a request/response pair handed to the routing
//! service. Two endpoints live here:
//!
//! - **stream**: a TCP listener speaking length-prefixed frames with a
//!   one-byte type code, one session worker thread per connection.
//! - **loopback**: an in-process endpoint with buffered responses, used by
//!   tests and embedders to reach services without a wire.

pub mod loopback;
pub mod stream;

pub use loopback::{LoopbackClient, LoopbackEndpoint, LoopbackResponse};
pub use stream::StreamEndpoint;
