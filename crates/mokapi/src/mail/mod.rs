//! Mail services: SMTP delivery into in-memory mailboxes read over IMAP.
//!
//! A [`MailService`] holds the mailboxes of one mail config and survives
//! config updates. The SMTP and IMAP handlers are bound to the addresses of
//! the config's servers.

pub mod error;
pub mod imap;
pub mod mailbox;
pub mod message;
pub mod rules;
pub mod sequence;
pub mod service;
pub mod smtp;

pub use error::{MailError, Rejection};
pub use imap::ImapHandler;
pub use mailbox::{Mailbox, Update};
pub use message::{Address, Message};
pub use service::{MailEvent, MailService};
pub use smtp::SmtpHandler;
