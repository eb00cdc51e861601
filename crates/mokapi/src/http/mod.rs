//! OpenAPI mock endpoints.
//!
//! Requests are matched against `paths` templates of every service sharing
//! the listener's address; the response is the first 2xx (or `default`)
//! response with a body generated from its schema.

pub mod path;
pub mod server;
pub mod service;

pub use server::{HttpHandler, Services};
pub use service::{HttpEvent, HttpRequest, HttpService, MockResponse};
