//! Mail server configuration.

use super::{split_url, Info};
use crate::patch::{patch_named, patch_option, patch_replace, patch_set, Named, Patch};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub mail: String,
    pub info: Info,
    pub servers: Vec<Server>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    pub mailboxes: Vec<MailboxConfig>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Smtp,
    Imap,
}

impl Server {
    pub fn protocol(&self) -> Option<Protocol> {
        match split_url(&self.url).0 {
            Some("smtp") | Some("smtps") => Some(Protocol::Smtp),
            Some("imap") | Some("imaps") => Some(Protocol::Imap),
            _ => None,
        }
    }

    pub fn address(&self) -> String {
        let (scheme, host) = split_url(&self.url);
        let default_port = match scheme {
            Some("imap") => 143,
            Some("imaps") => 993,
            Some("smtps") => 465,
            _ => 25,
        };
        super::listen_address(host, default_port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_recipients: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_mailbox: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailbox_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxConfig {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<FolderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<FolderConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Pattern>,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_response: Option<RejectResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectResponse {
    pub status_code: u16,
    pub enhanced_status_code: String,
    pub text: String,
}

/// Regular expression compiled while decoding.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

impl Config {
    pub fn max_recipients(&self) -> usize {
        self.settings
            .as_ref()
            .and_then(|s| s.max_recipients)
            .unwrap_or(0)
    }

    pub fn auto_create_mailbox(&self) -> bool {
        self.settings
            .as_ref()
            .and_then(|s| s.auto_create_mailbox)
            .unwrap_or(true)
    }

    pub fn mailbox_size(&self) -> usize {
        self.settings
            .as_ref()
            .and_then(|s| s.mailbox_size)
            .unwrap_or(0)
    }
}

// ============================================================================
// Patch
// ============================================================================

impl Patch for Config {
    fn patch(&mut self, other: &Self) {
        self.mail.patch(&other.mail);
        self.info.patch(&other.info);
        patch_named(&mut self.servers, &other.servers);
        patch_option(&mut self.settings, &other.settings);
        patch_named(&mut self.mailboxes, &other.mailboxes);
        for rule in &other.rules {
            match self
                .rules
                .iter_mut()
                .find(|r| !rule.name.is_empty() && r.name == rule.name)
            {
                Some(existing) => existing.patch(rule),
                None => self.rules.push(rule.clone()),
            }
        }
    }
}

impl Named for Server {
    fn name(&self) -> &str {
        &self.url
    }
}

impl Patch for Server {
    fn patch(&mut self, other: &Self) {
        self.description.patch(&other.description);
    }
}

impl Patch for Settings {
    fn patch(&mut self, other: &Self) {
        patch_replace(&mut self.max_recipients, &other.max_recipients);
        patch_replace(&mut self.auto_create_mailbox, &other.auto_create_mailbox);
        patch_replace(&mut self.mailbox_size, &other.mailbox_size);
    }
}

impl Named for MailboxConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Patch for MailboxConfig {
    fn patch(&mut self, other: &Self) {
        self.username.patch(&other.username);
        self.password.patch(&other.password);
        self.description.patch(&other.description);
        patch_named(&mut self.folders, &other.folders);
    }
}

impl Named for FolderConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Patch for FolderConfig {
    fn patch(&mut self, other: &Self) {
        patch_set(&mut self.flags, &other.flags);
        patch_named(&mut self.folders, &other.folders);
    }
}

impl Patch for Rule {
    fn patch(&mut self, other: &Self) {
        patch_replace(&mut self.sender, &other.sender);
        patch_replace(&mut self.recipient, &other.recipient);
        patch_replace(&mut self.subject, &other.subject);
        patch_replace(&mut self.body, &other.body);
        self.action = other.action;
        patch_replace(&mut self.reject_response, &other.reject_response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
mail: '1.0'
info:
  title: Mail Server
servers:
  - url: smtp://localhost:8025
  - url: imap://:8143
settings:
  maxRecipients: 5
mailboxes:
  - name: alice@mokapi.io
    username: alice
    password: secret
    folders:
      - name: Trash
rules:
  - name: foo.bar only
    sender: .*@foo.bar
    action: allow
"#;

    #[test]
    fn test_decode() {
        let c: Config = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(c.info.name(), "Mail Server");
        assert_eq!(c.servers[0].protocol(), Some(Protocol::Smtp));
        assert_eq!(c.servers[1].address(), "0.0.0.0:8143");
        assert_eq!(c.max_recipients(), 5);
        assert!(c.auto_create_mailbox());
        assert!(c.rules[0].sender.as_ref().unwrap().is_match("alice@foo.bar"));
    }

    #[test]
    fn test_invalid_regex_fails_decode() {
        let res: Result<Config, _> = serde_yaml::from_str(
            r#"
mail: '1.0'
rules:
  - sender: '(['
"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_patch_rules_and_mailboxes() {
        let mut c: Config = serde_yaml::from_str(CONFIG).unwrap();
        let other: Config = serde_yaml::from_str(
            r#"
mail: '1.0'
info: { title: Mail Server }
settings:
  autoCreateMailbox: false
mailboxes:
  - name: alice@mokapi.io
    folders:
      - name: Archive
  - name: bob@mokapi.io
rules:
  - name: foo.bar only
    sender: .*@mokapi.io
  - subject: spam
    action: deny
"#,
        )
        .unwrap();
        c.patch(&other);
        assert_eq!(c.mailboxes.len(), 2);
        assert_eq!(c.mailboxes[0].folders.len(), 2);
        assert_eq!(c.mailboxes[0].password, "secret");
        assert_eq!(c.rules.len(), 2);
        assert_eq!(c.rules[0].sender.as_ref().unwrap().as_str(), ".*@mokapi.io");
        assert!(!c.auto_create_mailbox());
        assert_eq!(c.max_recipients(), 5);
    }
}
