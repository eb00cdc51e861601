//! HTTP store: OpenAPI fragments to running mock endpoints.

use super::listeners::{release_service, sync_service, ConnectionHandler, ListenerManager};
use super::store::{Change, ServiceInfo, ServiceStore, StoreError, StoreSizes};
use crate::dynamic::Config;
use crate::events::EventManager;
use crate::http::{HttpHandler, HttpService, Services};
use crate::monitor::Monitor;
use crate::spec::openapi::Document;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

pub struct HttpStore {
    store: ServiceStore<Document>,
    services: Services,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    listeners: Arc<ListenerManager>,
}

fn listener_key(name: &str) -> String {
    format!("http/{name}")
}

impl HttpStore {
    pub fn new(
        monitor: Arc<Monitor>,
        events: Arc<EventManager>,
        listeners: Arc<ListenerManager>,
        sizes: StoreSizes,
    ) -> Self {
        Self {
            store: ServiceStore::new("http", Arc::clone(&events), sizes),
            services: Arc::new(RwLock::new(Default::default())),
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

    fn apply(&self, name: &str, change: Change<Document>) {
        match change {
            Change::Created(spec) | Change::Updated(spec) => {
                let service = {
                    let mut services = self.services.write();
                    match services.get(name) {
                        Some(s) => Arc::clone(s),
                        None => {
                            let s = HttpService::new(name, Arc::clone(&self.monitor), Arc::clone(&self.events));
                            services.set(name.to_string(), Arc::clone(&s));
                            s
                        }
                    }
                };
                service.update(spec);
                let handlers: Vec<(String, Arc<dyn ConnectionHandler>)> = service
                    .addresses()
                    .into_iter()
                    .map(|address| {
                        let handler: Arc<dyn ConnectionHandler> =
                            Arc::new(HttpHandler::new(&address, Arc::clone(&self.services)));
                        (address, handler)
                    })
                    .collect();
                sync_service(&self.listeners, &listener_key(name), handlers);
            }
            Change::Removed => {
                release_service(&self.listeners, &listener_key(name));
                self.services.write().delete(name);
                info!("http service {} removed", name);
            }
            Change::Unchanged => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceInfo<Document>> {
        self.store.get(name)
    }

    pub fn list(&self) -> Vec<ServiceInfo<Document>> {
        self.store.list()
    }

    pub fn service(&self, name: &str) -> Option<Arc<HttpService>> {
        self.services.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
