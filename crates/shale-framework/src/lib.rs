//! Component framework for the shale server runtime.
//!
//! A server is assembled from three ordered component kinds: resources,
//! services, and endpoints. The lifecycle engine drives them through a
//! deterministic setup → start → shutdown sequence; the routing service
//! demultiplexes framed client requests onto the registered services; the
//! session layer supplies per-session typed storage and declared variables.

pub mod component;
pub mod config;
pub mod environment;
pub mod error;
pub mod ids;
pub mod proto;
pub mod repository;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod session;
pub mod status;

pub use component::{BootMode, Component, ComponentId, Endpoint, Resource, Service};
pub use config::{ConfigError, Configuration, Section};
pub use environment::Environment;
pub use error::FrameworkError;
pub use repository::Repository;
pub use request::{DatabaseInfo, Request};
pub use response::{BlobInfo, DataChannel, Response, ResponseError, ResponseState, Writer};
pub use routing::RoutingService;
pub use server::{add_core_components, Server};
pub use session::SessionResource;
pub use status::{StatusCore, StatusResource};
