use std::fmt;

/// Mailbox and folder failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("mailbox '{0}' does not exist")]
    NoSuchFolder(String),

    #[error("mailbox '{0}' already exists")]
    FolderExists(String),

    #[error("Name \"{0}\" has inferior hierarchical names")]
    HasInferiors(String),

    #[error("cannot delete INBOX")]
    DeleteInbox,

    #[error("unknown mailbox {0}")]
    UnknownMailbox(String),

    #[error("invalid mailbox name '{0}'")]
    InvalidName(String),
}

/// SMTP reply rejecting a command, rendered as `<status> <enhanced> <message>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct Rejection {
    pub status: u16,
    pub enhanced: String,
    pub message: String,
}

impl Rejection {
    pub fn new(status: u16, enhanced: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            enhanced: enhanced.to_string(),
            message: message.into(),
        }
    }

    pub fn address_rejected(address: &str) -> Self {
        Self::new(550, "5.1.1", format!("Address rejected: {address}"))
    }

    pub fn auth_required() -> Self {
        Self::new(530, "5.7.0", "Authentication required")
    }

    pub fn too_many_recipients(max: usize) -> Self {
        Self::new(452, "4.5.3", format!("Too many recipients, maximum is {max}"))
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.status, self.enhanced, self.message)
    }
}
