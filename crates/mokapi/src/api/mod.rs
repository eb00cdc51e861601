//! Management HTTP API.
//!
//! Read-only JSON views of the running services, their events and metrics,
//! plus record injection into Kafka topics and ad-hoc schema tooling. All
//! routes live below `/api`, optionally behind a configured path prefix.

mod handlers;
mod router;
mod server;
mod types;

pub use handlers::kafka::{BINARY_CONTENT_TYPE, XML_CONTENT_TYPE};
pub use server::ApiServer;
pub use types::ApiError;
