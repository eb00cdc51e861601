//! IMAP4rev1 server over the mailboxes of a mail service.
//!
//! Supports the UIDPLUS, MOVE, IDLE, UNSELECT and LIST-EXTENDED
//! extensions and AUTHENTICATE PLAIN. Connections are plain text.

pub mod fetch;
pub mod parser;
pub mod search;
pub mod server;
pub mod session;

pub use server::ImapHandler;
pub use session::Session;
