//! Mail store: mail configs to mailboxes with SMTP and IMAP listeners.

use super::listeners::{release_service, sync_service, ConnectionHandler, ListenerManager};
use super::store::{Change, ServiceInfo, ServiceStore, StoreError, StoreSizes};
use crate::dynamic::Config;
use crate::events::EventManager;
use crate::mail::{ImapHandler, MailService, SmtpHandler};
use crate::monitor::Monitor;
use crate::sortedmap::SortedMap;
use crate::spec::mail::{self, Protocol};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

pub struct MailStore {
    store: ServiceStore<mail::Config>,
    services: RwLock<SortedMap<String, Arc<MailService>>>,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    listeners: Arc<ListenerManager>,
}

fn listener_key(name: &str) -> String {
    format!("mail/{name}")
}

impl MailStore {
    pub fn new(
        monitor: Arc<Monitor>,
        events: Arc<EventManager>,
        listeners: Arc<ListenerManager>,
        sizes: StoreSizes,
    ) -> Self {
        Self {
            store: ServiceStore::new("mail", Arc::clone(&events), sizes),
            services: RwLock::new(SortedMap::new()),
            monitor,
            events,
            listeners,
        }
    }

    pub fn add(&self, config: &Arc<Config>) -> Result<(), StoreError> {
        let (name, change) = self.store.add(config)?;
        self.apply(&name, change);
        Ok(())
    }

    pub fn remove(&self, config: &Config) {
        let (name, change) = self.store.remove(config);
        self.apply(&name, change);
    }

    fn apply(&self, name: &str, change: Change<mail::Config>) {
        match change {
            Change::Created(spec) | Change::Updated(spec) => {
                let service = {
                    let mut services = self.services.write();
                    match services.get(name) {
                        Some(s) => Arc::clone(s),
                        None => {
                            let s = MailService::new(name, Arc::clone(&self.monitor), Arc::clone(&self.events));
                            services.set(name.to_string(), Arc::clone(&s));
                            s
                        }
                    }
                };
                service.update(spec);
                let mut handlers: Vec<(String, Arc<dyn ConnectionHandler>)> = Vec::new();
                for address in service.addresses(Protocol::Smtp) {
                    let handler: Arc<dyn ConnectionHandler> = Arc::new(SmtpHandler::new(Arc::clone(&service)));
                    handlers.push((address, handler));
                }
                for address in service.addresses(Protocol::Imap) {
                    let handler: Arc<dyn ConnectionHandler> = Arc::new(ImapHandler::new(Arc::clone(&service)));
                    handlers.push((address, handler));
                }
                sync_service(&self.listeners, &listener_key(name), handlers);
            }
            Change::Removed => {
                release_service(&self.listeners, &listener_key(name));
                self.services.write().delete(name);
                info!("mail service {} removed", name);
            }
            Change::Unchanged => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceInfo<mail::Config>> {
        self.store.get(name)
    }

    pub fn list(&self) -> Vec<ServiceInfo<mail::Config>> {
        self.store.list()
    }

    pub fn service(&self, name: &str) -> Option<Arc<MailService>> {
        self.services.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
