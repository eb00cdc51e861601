//! Single dispatcher turning provider output into config events.

use super::{decode, Action, Config, ConfigData, ConfigEvent, Provider, ProviderEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

const CHANNEL_CAPACITY: usize = 100;

/// Receives config events in arrival order. Must not block.
pub trait ConfigListener: Send + Sync {
    fn on_config(&self, event: &ConfigEvent);
}

pub struct ConfigWatcher {
    providers: Vec<Arc<dyn Provider>>,
    listeners: Vec<Arc<dyn ConfigListener>>,
    configs: HashMap<String, Arc<Config>>,
}

impl ConfigWatcher {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            listeners: Vec::new(),
            configs: HashMap::new(),
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ConfigListener>) {
        self.listeners.push(listener);
    }

    /// Turns one provider event into config events.
    ///
    /// A key always starts with `Create`. Unchanged content and documents
    /// that fail to decode produce nothing; in the latter case the previous
    /// version stays active.
    pub fn apply(&mut self, event: ProviderEvent) -> Vec<ConfigEvent> {
        match event {
            ProviderEvent::Changed(mut config) => {
                let previous = self.configs.get(&config.key).cloned();
                if let Some(prev) = &previous {
                    if prev.raw == config.raw {
                        debug!("config {} unchanged", config.url);
                        return Vec::new();
                    }
                }

                config.data = match decode(&config.raw) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("unable to read config {}: {}", config.url, e);
                        return Vec::new();
                    }
                };
                if config.data == ConfigData::Unknown {
                    debug!("skipping config {}: unknown document type", config.url);
                    return Vec::new();
                }

                let config = Arc::new(config);
                let name = config.data.name().unwrap_or_default().to_string();
                self.configs.insert(config.key.clone(), Arc::clone(&config));

                let mut events = Vec::new();
                match previous {
                    None => events.push(ConfigEvent {
                        name,
                        config,
                        action: Action::Create,
                    }),
                    Some(prev) => {
                        let prev_name = prev.data.name().unwrap_or_default().to_string();
                        if prev_name != name || prev.data.kind() != config.data.kind() {
                            events.push(ConfigEvent {
                                name: prev_name,
                                config: prev,
                                action: Action::Delete,
                            });
                            events.push(ConfigEvent {
                                name,
                                config,
                                action: Action::Create,
                            });
                        } else {
                            events.push(ConfigEvent {
                                name,
                                config,
                                action: Action::Update,
                            });
                        }
                    }
                }
                events
            }
            ProviderEvent::Removed { key } => match self.configs.remove(&key) {
                Some(config) => vec![ConfigEvent {
                    name: config.data.name().unwrap_or_default().to_string(),
                    config,
                    action: Action::Delete,
                }],
                None => Vec::new(),
            },
        }
    }

    fn dispatch(&self, events: &[ConfigEvent]) {
        for event in events {
            info!(
                "config {} {} ({})",
                event.config.url, event.action, event.config.data.kind()
            );
            for listener in &self.listeners {
                listener.on_config(event);
            }
        }
    }

    /// Starts all providers and dispatches their output until shutdown.
    pub async fn run(mut self, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let tx = tx.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = provider.run(tx, shutdown_rx).await {
                    error!("provider {} failed: {}", provider.name(), e);
                }
            });
        }
        drop(tx);

        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(event) = msg else { break };
                    let events = self.apply(event);
                    self.dispatch(&events);
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("config watcher stopped");
        Ok(())
    }
}

impl Default for ConfigWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn changed(url: &str, raw: &str) -> ProviderEvent {
        ProviderEvent::Changed(Config::new("test", url, raw.as_bytes().to_vec()))
    }

    #[test]
    fn test_create_then_update() {
        let mut w = ConfigWatcher::new();
        let e = w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}"));
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].action, Action::Create);
        assert_eq!(e[0].name, "x");

        let e = w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x, version: '2'}"));
        assert_eq!(e[0].action, Action::Update);
    }

    #[test]
    fn test_unchanged_content_is_ignored() {
        let mut w = ConfigWatcher::new();
        w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}"));
        assert!(w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}")).is_empty());
    }

    #[test]
    fn test_decode_failure_keeps_previous() {
        let mut w = ConfigWatcher::new();
        w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}"));
        assert!(w.apply(changed("a.yaml", "ldap: [")).is_empty());
        let e = w.apply(ProviderEvent::Removed { key: "a.yaml".into() });
        assert_eq!(e[0].action, Action::Delete);
        assert_eq!(e[0].name, "x");
    }

    #[test]
    fn test_first_valid_version_after_failure_is_create() {
        let mut w = ConfigWatcher::new();
        assert!(w.apply(changed("a.yaml", "mail: [")).is_empty());
        let e = w.apply(changed("a.yaml", "mail: '1.0'\ninfo: {title: m}"));
        assert_eq!(e[0].action, Action::Create);
    }

    #[test]
    fn test_rename_emits_delete_and_create() {
        let mut w = ConfigWatcher::new();
        w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}"));
        let e = w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: y}"));
        let actions: Vec<_> = e.iter().map(|e| (e.action, e.name.as_str())).collect();
        assert_eq!(actions, vec![(Action::Delete, "x"), (Action::Create, "y")]);
    }

    #[test]
    fn test_unknown_removal_is_ignored() {
        let mut w = ConfigWatcher::new();
        assert!(w.apply(ProviderEvent::Removed { key: "nope".into() }).is_empty());
    }

    struct Recorder(Mutex<Vec<(Action, String)>>);

    impl ConfigListener for Recorder {
        fn on_config(&self, event: &ConfigEvent) {
            self.0.lock().push((event.action, event.name.clone()));
        }
    }

    #[test]
    fn test_dispatch_reaches_listeners_in_order() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut w = ConfigWatcher::new();
        w.add_listener(recorder.clone());
        let mut events = w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x}"));
        events.extend(w.apply(changed("a.yaml", "ldap: '1.0'\ninfo: {title: x, version: '1'}")));
        w.dispatch(&events);
        assert_eq!(
            *recorder.0.lock(),
            vec![(Action::Create, "x".to_string()), (Action::Update, "x".to_string())]
        );
    }
}
