//! Runtime state of one mail service.

use super::error::Rejection;
use super::mailbox::{Mailbox, INBOX};
use super::message::Message;
use super::rules::{self, Field};
use crate::events::{EventData, EventManager, Traits};
use crate::monitor::{now_timestamp, Monitor};
use crate::spec::mail::{Config, Protocol};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

struct State {
    config: Arc<Config>,
    mailboxes: BTreeMap<String, Arc<Mailbox>>,
}

/// Mailboxes and rules of a mail service. Survives config updates.
pub struct MailService {
    pub name: String,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    state: RwLock<State>,
}

fn key(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

impl MailService {
    pub fn new(name: &str, monitor: Arc<Monitor>, events: Arc<EventManager>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            monitor,
            events,
            state: RwLock::new(State {
                config: Arc::new(Config::default()),
                mailboxes: BTreeMap::new(),
            }),
        })
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.state.read().config)
    }

    /// Applies a merged config. Mailboxes no longer declared keep their
    /// messages.
    pub fn update(&self, config: Arc<Config>) {
        let mut state = self.state.write();
        for declared in &config.mailboxes {
            let mailbox = state
                .mailboxes
                .entry(key(&declared.name))
                .or_insert_with(|| Arc::new(Mailbox::new(&declared.name)));
            mailbox.configure(declared);
        }
        state.config = config;
    }

    pub fn addresses(&self, protocol: Protocol) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .state
            .read()
            .config
            .servers
            .iter()
            .filter(|s| s.protocol() == Some(protocol))
            .map(|s| s.address())
            .collect();
        addresses.dedup();
        addresses
    }

    pub fn mailbox(&self, address: &str) -> Option<Arc<Mailbox>> {
        self.state.read().mailboxes.get(&key(address)).cloned()
    }

    pub fn mailboxes(&self) -> Vec<Arc<Mailbox>> {
        self.state.read().mailboxes.values().cloned().collect()
    }

    fn get_or_create(&self, address: &str) -> Option<Arc<Mailbox>> {
        if let Some(mailbox) = self.mailbox(address) {
            return Some(mailbox);
        }
        let mut state = self.state.write();
        if !state.config.auto_create_mailbox() {
            return None;
        }
        let mailbox = state
            .mailboxes
            .entry(key(address))
            .or_insert_with(|| {
                info!("service {}: creating mailbox {}", self.name, address);
                Arc::new(Mailbox::new(address.trim()))
            });
        Some(Arc::clone(mailbox))
    }

    /// Mailbox accepting `username`/`password`. Unknown users get a new
    /// mailbox when auto creation is enabled.
    pub fn login(&self, username: &str, password: &str) -> Option<Arc<Mailbox>> {
        let known = {
            let state = self.state.read();
            if let Some(mailbox) = state
                .mailboxes
                .values()
                .find(|m| m.authenticate(username, password))
            {
                return Some(Arc::clone(mailbox));
            }
            state
                .mailboxes
                .values()
                .any(|m| m.name.eq_ignore_ascii_case(username) || m.username() == username)
        };
        if known {
            return None;
        }
        self.get_or_create(username)
    }

    // ========================================================================
    // SMTP checks
    // ========================================================================

    /// Validates the envelope sender. `authenticated` is the login of the
    /// session, if any.
    pub fn check_sender(&self, sender: &str, authenticated: Option<&str>) -> Result<(), Rejection> {
        let state = self.state.read();
        match state.mailboxes.get(&key(sender)) {
            Some(mailbox) if mailbox.requires_auth() && authenticated.is_none() => {
                return Err(Rejection::auth_required());
            }
            None if !state.config.mailboxes.is_empty() => {
                return Err(Rejection::address_rejected(sender));
            }
            _ => {}
        }
        rules::check(&state.config.rules, Field::Sender, sender)
    }

    /// Validates a recipient; `accepted` is the number of recipients already
    /// accepted in this transaction.
    pub fn check_recipient(&self, recipient: &str, accepted: usize) -> Result<(), Rejection> {
        let state = self.state.read();
        let max = state.config.max_recipients();
        if max > 0 && accepted >= max {
            return Err(Rejection::too_many_recipients(max));
        }
        if !state.mailboxes.contains_key(&key(recipient)) && !state.config.auto_create_mailbox() {
            return Err(Rejection::address_rejected(recipient));
        }
        rules::check(&state.config.rules, Field::Recipient, recipient)
    }

    /// Runs content rules and appends the message to the INBOX of every
    /// recipient.
    pub fn deliver(&self, sender: &str, recipients: &[String], message: Message) -> Result<(), Rejection> {
        let config = self.config();
        rules::check(&config.rules, Field::Subject, &message.subject)?;
        rules::check(&config.rules, Field::Body, &message.body())?;

        let message = Arc::new(message);
        let limit = config.mailbox_size();
        for recipient in recipients {
            let Some(mailbox) = self.get_or_create(recipient) else {
                return Err(Rejection::address_rejected(recipient));
            };
            if let Err(e) = mailbox.append(INBOX, Arc::clone(&message), None, None) {
                return Err(Rejection::new(451, "4.3.0", e.to_string()));
            }
            if limit > 0 {
                mailbox.truncate(INBOX, limit);
            }
        }

        self.monitor
            .mail
            .mails
            .with_label(&[self.name.as_str(), sender])
            .inc();
        self.monitor
            .mail
            .last_mail
            .with_label(&[self.name.as_str()])
            .set(now_timestamp());

        let event = MailEvent {
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            message,
        };
        let traits = Traits::new().with_namespace("mail").with_name(&self.name);
        if let Err(e) = self.events.push(Arc::new(event), traits) {
            debug!("unable to log mail event: {}", e);
        }
        Ok(())
    }

    /// Counts a rejected or failed command.
    pub fn track_error(&self, command: &str) {
        self.monitor
            .mail
            .requests_errors_total
            .with_label(&[self.name.as_str(), command])
            .inc();
    }
}

/// Event logged for each accepted mail.
#[derive(Debug)]
pub struct MailEvent {
    pub sender: String,
    pub recipients: Vec<String>,
    pub message: Arc<Message>,
}

impl EventData for MailEvent {
    fn title(&self) -> String {
        if self.message.subject.is_empty() {
            "(no subject)".to_string()
        } else {
            self.message.subject.clone()
        }
    }

    fn to_json(&self) -> Value {
        let mut v = self.message.to_json();
        v["envelope"] = json!({ "from": self.sender, "to": self.recipients });
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::mail::Config;

    fn service(yaml: &str) -> (Arc<MailService>, Arc<Monitor>, Arc<EventManager>) {
        let monitor = Arc::new(Monitor::new());
        let events = Arc::new(EventManager::new());
        events.set_store(10, Traits::new().with_namespace("mail").with_name("smtp"));
        let svc = MailService::new("smtp", Arc::clone(&monitor), Arc::clone(&events));
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        svc.update(Arc::new(config));
        (svc, monitor, events)
    }

    fn message(subject: &str) -> Message {
        Message::parse(format!("From: a@foo.bar\r\nSubject: {subject}\r\n\r\nhello").into_bytes())
    }

    #[test]
    fn test_deliver_auto_creates_mailbox() {
        let (svc, monitor, events) = service("mail: '1.0'\ninfo: {title: smtp}\n");
        svc.deliver("a@foo.bar", &["bob@mokapi.io".to_string()], message("hi"))
            .unwrap();
        let mailbox = svc.mailbox("Bob@Mokapi.io").unwrap();
        assert_eq!(mailbox.status(INBOX).unwrap().messages, 1);
        assert_eq!(monitor.mail.mails.value(&["smtp", "a@foo.bar"]), Some(1.0));
        let traits = Traits::new().with_namespace("mail").with_name("smtp");
        assert_eq!(events.get_events(&traits)[0].data.title(), "hi");
    }

    #[test]
    fn test_unknown_addresses_rejected_without_auto_create() {
        let (svc, _, _) = service(
            "mail: '1.0'\ninfo: {title: smtp}\nsettings: {autoCreateMailbox: false, maxRecipients: 1}\nmailboxes:\n  - name: alice@mokapi.io\n",
        );
        assert_eq!(svc.check_sender("x@y.z", None).unwrap_err().enhanced, "5.1.1");
        assert!(svc.check_sender("alice@mokapi.io", None).is_ok());
        assert!(svc.check_recipient("alice@mokapi.io", 0).is_ok());
        assert_eq!(svc.check_recipient("alice@mokapi.io", 1).unwrap_err().status, 452);
        assert_eq!(svc.check_recipient("bob@mokapi.io", 0).unwrap_err().status, 550);
    }

    #[test]
    fn test_unknown_sender_rejected_with_declared_mailboxes() {
        let (svc, _, _) = service("mail: '1.0'\ninfo: {title: smtp}\nmailboxes:\n  - name: alice@mokapi.io\n");
        let err = svc.check_sender("mallory@evil.io", None).unwrap_err();
        assert_eq!(err.to_string(), "550 5.1.1 Address rejected: mallory@evil.io");
        assert!(svc.check_sender("alice@mokapi.io", None).is_ok());
        // recipients still follow autoCreateMailbox
        assert!(svc.check_recipient("bob@mokapi.io", 0).is_ok());

        let (svc, _, _) = service("mail: '1.0'\ninfo: {title: smtp}\n");
        assert!(svc.check_sender("mallory@evil.io", None).is_ok());
    }

    #[test]
    fn test_sender_requires_auth() {
        let (svc, _, _) = service(
            "mail: '1.0'\ninfo: {title: smtp}\nmailboxes:\n  - name: alice@mokapi.io\n    password: secret\n",
        );
        assert_eq!(svc.check_sender("alice@mokapi.io", None).unwrap_err().status, 530);
        assert!(svc.check_sender("alice@mokapi.io", Some("alice@mokapi.io")).is_ok());
    }

    #[test]
    fn test_content_rules_block_delivery() {
        let (svc, monitor, _) = service(
            "mail: '1.0'\ninfo: {title: smtp}\nrules:\n  - subject: spam\n    action: deny\n",
        );
        let err = svc
            .deliver("a@foo.bar", &["bob@mokapi.io".to_string()], message("spam"))
            .unwrap_err();
        assert_eq!(err.enhanced, "5.6.0");
        assert!(svc.mailbox("bob@mokapi.io").is_none());
        assert_eq!(monitor.mail.mails.sum(), 0.0);
    }

    #[test]
    fn test_mailbox_size_limit() {
        let (svc, _, _) = service("mail: '1.0'\ninfo: {title: smtp}\nsettings: {mailboxSize: 2}\n");
        for i in 0..3 {
            svc.deliver("a@foo.bar", &["bob@mokapi.io".to_string()], message(&i.to_string()))
                .unwrap();
        }
        let mails = svc.mailbox("bob@mokapi.io").unwrap().snapshot(INBOX).unwrap();
        assert_eq!(mails.len(), 2);
        assert_eq!(mails[0].message.subject, "1");
    }

    #[test]
    fn test_login() {
        let (svc, _, _) = service(
            "mail: '1.0'\ninfo: {title: smtp}\nmailboxes:\n  - name: alice@mokapi.io\n    username: alice\n    password: secret\n",
        );
        assert!(svc.login("alice", "secret").is_some());
        assert!(svc.login("alice", "nope").is_none());
        assert_eq!(svc.login("carol@mokapi.io", "x").unwrap().name, "carol@mokapi.io");
    }
}
