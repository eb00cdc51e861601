//! Lifecycle root of a running instance.

use super::http::HttpStore;
use super::kafka::KafkaStore;
use super::ldap::LdapStore;
use super::listeners::ListenerManager;
use super::mail::MailStore;
use super::store::{StoreError, StoreSizes};
use crate::dynamic::{Action, Config, ConfigData, ConfigEvent, ConfigListener};
use crate::events::{EventData, EventManager, Traits};
use crate::monitor::{now_timestamp, Monitor};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Holds the monitor, the event manager and the four protocol stores.
pub struct App {
    pub version: String,
    pub monitor: Arc<Monitor>,
    pub events: Arc<EventManager>,
    pub listeners: Arc<ListenerManager>,
    pub http: HttpStore,
    pub kafka: KafkaStore,
    pub mail: MailStore,
    pub ldap: LdapStore,
}

impl App {
    pub fn new(sizes: StoreSizes) -> Arc<Self> {
        let monitor = Arc::new(Monitor::new());
        let events = Arc::new(EventManager::new());
        let listeners = Arc::new(ListenerManager::new());
        events.set_store(sizes.size_for("config"), Traits::new().with_namespace("config"));
        monitor.app.start_timestamp.set(now_timestamp());

        Arc::new(Self {
            version: VERSION.to_string(),
            http: HttpStore::new(Arc::clone(&monitor), Arc::clone(&events), Arc::clone(&listeners), sizes.clone()),
            kafka: KafkaStore::new(Arc::clone(&monitor), Arc::clone(&events), Arc::clone(&listeners), sizes.clone()),
            mail: MailStore::new(Arc::clone(&monitor), Arc::clone(&events), Arc::clone(&listeners), sizes.clone()),
            ldap: LdapStore::new(Arc::clone(&monitor), Arc::clone(&events), Arc::clone(&listeners), sizes),
            monitor,
            events,
            listeners,
        })
    }

    /// Routes a config event to the store of its document type.
    pub fn update_config(&self, event: &ConfigEvent) {
        let config = &event.config;
        if config.data == ConfigData::Unknown {
            debug!("ignoring config {}: unknown document type", config.url);
            return;
        }
        let result = match event.action {
            Action::Delete => {
                self.remove(config);
                Ok(())
            }
            Action::Create | Action::Update => self.add(config),
        };
        if let Err(e) = result {
            error!("config {}: {}", config.url, e);
            return;
        }

        let data = ConfigChangeEvent {
            action: event.action,
            kind: config.data.kind(),
            service: event.name.clone(),
            url: config.url.clone(),
            provider: config.provider.clone(),
        };
        let traits = Traits::new().with_namespace("config").with_name(&event.name);
        if let Err(e) = self.events.push(Arc::new(data), traits) {
            debug!("unable to log config event: {}", e);
        }
    }

    fn add(&self, config: &Arc<Config>) -> Result<(), StoreError> {
        match &config.data {
            ConfigData::OpenApi(_) => self.http.add(config),
            ConfigData::AsyncApi(_) => self.kafka.add(config),
            ConfigData::Mail(_) => self.mail.add(config),
            ConfigData::Directory(_) => self.ldap.add(config),
            ConfigData::Unknown => Ok(()),
        }
    }

    fn remove(&self, config: &Config) {
        match &config.data {
            ConfigData::OpenApi(_) => self.http.remove(config),
            ConfigData::AsyncApi(_) => self.kafka.remove(config),
            ConfigData::Mail(_) => self.mail.remove(config),
            ConfigData::Directory(_) => self.ldap.remove(config),
            ConfigData::Unknown => {}
        }
    }

    /// Protocols with at least one service.
    pub fn active_services(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if !self.http.is_empty() {
            active.push("http");
        }
        if !self.kafka.is_empty() {
            active.push("kafka");
        }
        if !self.mail.is_empty() {
            active.push("mail");
        }
        if !self.ldap.is_empty() {
            active.push("ldap");
        }
        active
    }

    pub fn shutdown(&self) {
        self.listeners.shutdown();
    }

    /// Applies a document directly, as if a provider had emitted it.
    pub fn apply(&self, config: Config, action: Action) {
        let name = config.data.name().unwrap_or_default().to_string();
        self.update_config(&ConfigEvent {
            name,
            config: Arc::new(config),
            action,
        });
    }
}

impl ConfigListener for App {
    fn on_config(&self, event: &ConfigEvent) {
        self.update_config(event);
    }
}

/// Lifecycle event of a config document.
#[derive(Debug)]
pub struct ConfigChangeEvent {
    pub action: Action,
    pub kind: &'static str,
    pub service: String,
    pub url: String,
    pub provider: String,
}

impl EventData for ConfigChangeEvent {
    fn title(&self) -> String {
        format!("{} {} {}", self.action, self.kind, self.service)
    }

    fn to_json(&self) -> Value {
        json!({
            "action": self.action,
            "url": self.url,
            "provider": self.provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::decode;

    fn config(url: &str, raw: &str) -> Config {
        let mut c = Config::new("test", url, raw.as_bytes().to_vec());
        c.data = decode(raw.as_bytes()).unwrap();
        c
    }

    const DIRECTORY: &str = "ldap: '1.0'\ninfo:\n  title: dir\nserver:\n  address: 127.0.0.1:0\nrootDomainNamingContext: dc=mokapi,dc=io\n";

    #[tokio::test]
    async fn test_routes_config_to_store_and_logs_event() {
        let app = App::new(StoreSizes::default());
        app.apply(config("file:///dir.yaml", DIRECTORY), Action::Create);
        assert_eq!(app.ldap.len(), 1);
        assert!(app.ldap.service("dir").is_some());
        assert_eq!(app.active_services(), vec!["ldap"]);
        assert!(app.listeners.local_addr("127.0.0.1:0").is_some());

        let events = app.events.get_events(&Traits::new().with_namespace("config"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.title(), "create ldap dir");
        assert_eq!(events[0].data.to_json()["url"], "file:///dir.yaml");

        app.apply(config("file:///dir.yaml", DIRECTORY), Action::Delete);
        assert!(app.ldap.is_empty());
        assert!(app.listeners.local_addr("127.0.0.1:0").is_none());
        app.shutdown();
    }

    #[tokio::test]
    async fn test_start_timestamp_set() {
        let app = App::new(StoreSizes::default());
        assert!(app.monitor.app.start_timestamp.value() > 0.0);
    }
}
