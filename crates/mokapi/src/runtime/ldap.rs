//! LDAP store: directory configs to LDAP listeners.

use super::listeners::{release_service, sync_service, ConnectionHandler, ListenerManager};
use super::store::{Change, ServiceInfo, ServiceStore, StoreError, StoreSizes};
use crate::dynamic::Config;
use crate::events::EventManager;
use crate::ldap::{LdapHandler, LdapService};
use crate::monitor::Monitor;
use crate::sortedmap::SortedMap;
use crate::spec::directory;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

pub struct LdapStore {
    store: ServiceStore<directory::Config>,
    services: RwLock<SortedMap<String, Arc<LdapService>>>,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    listeners: Arc<ListenerManager>,
}

fn listener_key(name: &str) -> String {
    format!("ldap/{name}")
}

impl LdapStore {
    pub fn new(
        monitor: Arc<Monitor>,
        events: Arc<EventManager>,
        listeners: Arc<ListenerManager>,
        sizes: StoreSizes,
    ) -> Self {
        Self {
            store: ServiceStore::new("ldap", Arc::clone(&events), sizes),
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

    fn apply(&self, name: &str, change: Change<directory::Config>) {
        match change {
            Change::Created(spec) | Change::Updated(spec) => {
                let service = {
                    let mut services = self.services.write();
                    match services.get(name) {
                        Some(s) => Arc::clone(s),
                        None => {
                            let s = LdapService::new(name, Arc::clone(&self.monitor), Arc::clone(&self.events));
                            services.set(name.to_string(), Arc::clone(&s));
                            s
                        }
                    }
                };
                service.update(spec);
                let handler: Arc<dyn ConnectionHandler> = Arc::new(LdapHandler::new(Arc::clone(&service)));
                sync_service(&self.listeners, &listener_key(name), vec![(service.address(), handler)]);
            }
            Change::Removed => {
                release_service(&self.listeners, &listener_key(name));
                self.services.write().delete(name);
                info!("ldap service {} removed", name);
            }
            Change::Unchanged => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceInfo<directory::Config>> {
        self.store.get(name)
    }

    pub fn list(&self) -> Vec<ServiceInfo<directory::Config>> {
        self.store.list()
    }

    pub fn service(&self, name: &str) -> Option<Arc<LdapService>> {
        self.services.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
