//! Dynamic configuration.
//!
//! Providers read raw documents, [`decode`] turns them into typed
//! [`ConfigData`] and the [`ConfigWatcher`] turns provider output into an
//! ordered stream of [`ConfigEvent`]s.

mod decode;
mod provider;
mod watcher;

pub use decode::{decode, DecodeError};
pub use provider::{FileProvider, FileProviderConfig, Provider, ProviderEvent};
pub use watcher::{ConfigListener, ConfigWatcher};

use crate::spec::{asyncapi, directory, mail, openapi};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Decoded document variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigData {
    OpenApi(Box<openapi::Document>),
    AsyncApi(Box<asyncapi::Document>),
    Mail(Box<mail::Config>),
    Directory(Box<directory::Config>),
    Unknown,
}

impl ConfigData {
    /// Logical service name, `None` for unknown documents.
    pub fn name(&self) -> Option<&str> {
        match self {
            ConfigData::OpenApi(d) => Some(d.info.name()),
            ConfigData::AsyncApi(d) => Some(d.info.name()),
            ConfigData::Mail(c) => Some(c.info.name()),
            ConfigData::Directory(c) => Some(c.info.name()),
            ConfigData::Unknown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigData::OpenApi(_) => "http",
            ConfigData::AsyncApi(_) => "kafka",
            ConfigData::Mail(_) => "mail",
            ConfigData::Directory(_) => "ldap",
            ConfigData::Unknown => "unknown",
        }
    }
}

/// A configuration document as emitted by a provider.
#[derive(Debug, Clone)]
pub struct Config {
    pub key: String,
    pub provider: String,
    pub url: String,
    pub raw: Vec<u8>,
    pub last_modified: DateTime<Utc>,
    pub data: ConfigData,
}

impl Config {
    pub fn new(provider: &str, url: &str, raw: Vec<u8>) -> Self {
        Self {
            key: url.to_string(),
            provider: provider.to_string(),
            url: url.to_string(),
            raw,
            last_modified: Utc::now(),
            data: ConfigData::Unknown,
        }
    }

    /// Last path segment of the source URL, the patch ordering key.
    pub fn base_name(&self) -> &str {
        base_name(&self.url)
    }

    pub fn info(&self) -> ConfigInfo {
        ConfigInfo {
            provider: self.provider.clone(),
            url: self.url.clone(),
            time: self.last_modified,
        }
    }
}

pub fn base_name(url: &str) -> &str {
    let trimmed = url.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// Source information reported by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub provider: String,
    pub url: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigEvent {
    pub name: String,
    pub config: Arc<Config>,
    pub action: Action,
}
