//! Mokapi: mock HTTP, Kafka, mail and LDAP services from their
//! specifications.
//!
//! Documents read by the config providers are decoded in [`dynamic`],
//! merged per service by the [`runtime`] stores and served by the protocol
//! modules. The [`api`] module exposes the running state over HTTP.

pub mod api;
pub mod buffer;
pub mod cli;
pub mod dynamic;
pub mod events;
pub mod http;
pub mod kafka;
pub mod ldap;
pub mod logging;
pub mod mail;
pub mod monitor;
pub mod patch;
pub mod runtime;
pub mod sortedmap;
pub mod spec;
