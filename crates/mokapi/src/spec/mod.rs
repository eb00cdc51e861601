//! Decoded specification documents.
//!
//! Each protocol has its own document type; all of them carry an `info`
//! block whose title is the logical service name used to group fragments.

pub mod asyncapi;
pub mod directory;
pub mod mail;
pub mod openapi;
pub mod schema;

use crate::patch::Patch;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Info {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Info {
    /// Logical service name.
    pub fn name(&self) -> &str {
        &self.title
    }
}

impl Patch for Info {
    fn patch(&mut self, other: &Self) {
        self.title.patch(&other.title);
        self.version.patch(&other.version);
        self.description.patch(&other.description);
    }
}

/// Splits `scheme://host:port` into its scheme and `host:port`.
pub fn split_url(url: &str) -> (Option<&str>, &str) {
    match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest.trim_end_matches('/')),
        None => (None, url.trim_end_matches('/')),
    }
}

/// Normalises a listen address; a missing host binds all interfaces.
pub fn listen_address(host: &str, default_port: u16) -> String {
    let host = host.trim();
    if host.is_empty() {
        return format!("0.0.0.0:{default_port}");
    }
    match host.rsplit_once(':') {
        Some(("", port)) => format!("0.0.0.0:{port}"),
        Some(_) => host.to_string(),
        None => format!("{host}:{default_port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("smtp://localhost:25"), (Some("smtp"), "localhost:25"));
        assert_eq!(split_url(":389"), (None, ":389"));
    }

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":389", 389), "0.0.0.0:389");
        assert_eq!(listen_address("127.0.0.1", 25), "127.0.0.1:25");
        assert_eq!(listen_address("", 9092), "0.0.0.0:9092");
        assert_eq!(listen_address("localhost:8025", 25), "localhost:8025");
    }
}
