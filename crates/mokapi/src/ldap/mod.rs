//! LDAP directory mock.
//!
//! Serves Bind and Search over the entries of a directory config. Other
//! operations are refused with `unwillingToPerform`.

pub mod ber;
pub mod filter;
pub mod message;
pub mod server;
pub mod service;

pub use filter::Filter;
pub use message::ResultCode;
pub use server::LdapHandler;
pub use service::{LdapEvent, LdapService};
