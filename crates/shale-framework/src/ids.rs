//! Stable numeric registry of component ids.
//!
//! The first 256 ids of each kind are reserved for the framework itself.
//! A routing header carrying an id absent from the service repository
//! yields a `SERVICE_UNAVAILABLE` diagnostic.

use crate::component::ComponentId;

// services
pub const SERVICE_ID_ROUTING: ComponentId = 0;
pub const SERVICE_ID_ENDPOINT_BROKER: ComponentId = 1;
pub const SERVICE_ID_DATASTORE: ComponentId = 2;
pub const SERVICE_ID_SQL: ComponentId = 3;
pub const SERVICE_ID_DEBUG: ComponentId = 6;
pub const SERVICE_ID_SESSION: ComponentId = 7;
pub const SERVICE_ID_METRICS: ComponentId = 8;
pub const SERVICE_ID_ALTIMETER: ComponentId = 9;
pub const SERVICE_ID_REQUEST: ComponentId = 10;
pub const SERVICE_ID_AUTHENTICATION: ComponentId = 11;
pub const SERVICE_ID_SYSTEM: ComponentId = 12;

// resources
pub const RESOURCE_ID_STATUS: ComponentId = 0;
pub const RESOURCE_ID_SESSION: ComponentId = 1;
pub const RESOURCE_ID_DIAGNOSTIC: ComponentId = 2;

// endpoints
pub const ENDPOINT_ID_STREAM: ComponentId = 0;
pub const ENDPOINT_ID_LOOPBACK: ComponentId = 1;
