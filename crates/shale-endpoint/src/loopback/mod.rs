//! In-process loopback endpoint.
//!
//! Carries no transport: a [`LoopbackClient`] frames a request, calls the
//! routing service directly, and hands back a buffered response. Used by
//! integration tests and embedders.

mod client;
mod endpoint;
mod request;
mod response;

pub use client::LoopbackClient;
pub use endpoint::LoopbackEndpoint;
pub use request::LoopbackRequest;
pub use response::{LoopbackDataChannel, LoopbackResponse};
