//! Runtime: the app, the per-protocol stores and the shared listeners.

pub mod app;
pub mod http;
pub mod kafka;
pub mod ldap;
pub mod listeners;
pub mod mail;
pub mod store;

pub use app::{App, VERSION};
pub use listeners::{ConnectionHandler, ListenerManager};
pub use store::{Change, ServiceInfo, ServiceStore, StoreError, StoreSizes};
