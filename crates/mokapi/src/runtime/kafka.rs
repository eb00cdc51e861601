//! Kafka store: AsyncAPI fragments to clusters with broker listeners.

use super::listeners::{release_service, sync_service, ConnectionHandler, ListenerManager};
use super::store::{Change, ServiceInfo, ServiceStore, StoreError, StoreSizes};
use crate::dynamic::Config;
use crate::events::EventManager;
use crate::kafka::{BrokerHandler, Cluster};
use crate::monitor::Monitor;
use crate::sortedmap::SortedMap;
use crate::spec::asyncapi::Document;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info};

pub struct KafkaStore {
    store: ServiceStore<Document>,
    clusters: RwLock<SortedMap<String, Arc<Cluster>>>,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    listeners: Arc<ListenerManager>,
}

fn listener_key(name: &str) -> String {
    format!("kafka/{name}")
}

impl KafkaStore {
    pub fn new(
        monitor: Arc<Monitor>,
        events: Arc<EventManager>,
        listeners: Arc<ListenerManager>,
        sizes: StoreSizes,
    ) -> Self {
        Self {
            store: ServiceStore::new("kafka", Arc::clone(&events), sizes),
            clusters: RwLock::new(SortedMap::new()),
            monitor,
            events,
            listeners,
        }
    }

    pub fn add(&self, config: &Arc<Config>) -> Result<(), StoreError> {
        let (name, change) = self.store.add(config)?;
        self.apply(&name, change, &config.url);
        Ok(())
    }

    pub fn remove(&self, config: &Config) {
        let (name, change) = self.store.remove(config);
        self.apply(&name, change, &config.url);
    }

    fn apply(&self, name: &str, change: Change<Document>, url: &str) {
        match change {
            Change::Created(spec) | Change::Updated(spec) => {
                let cluster = {
                    let mut clusters = self.clusters.write();
                    match clusters.get(name) {
                        Some(c) => Arc::clone(c),
                        None => {
                            let c = Cluster::new(name, Arc::clone(&self.monitor), Arc::clone(&self.events));
                            clusters.set(name.to_string(), Arc::clone(&c));
                            c
                        }
                    }
                };
                for refused in cluster.update(spec) {
                    error!("config {}: {}", url, refused);
                }
                let handlers: Vec<(String, Arc<dyn ConnectionHandler>)> = cluster
                    .broker_addresses()
                    .into_iter()
                    .map(|address| {
                        let handler: Arc<dyn ConnectionHandler> =
                            Arc::new(BrokerHandler::new(Arc::clone(&cluster), &address));
                        (address, handler)
                    })
                    .collect();
                for (address, local) in sync_service(&self.listeners, &listener_key(name), handlers) {
                    cluster.set_broker_port(&address, local.port());
                }
            }
            Change::Removed => {
                release_service(&self.listeners, &listener_key(name));
                if let Some(cluster) = self.clusters.write().delete(name) {
                    cluster.close();
                }
                info!("kafka service {} removed", name);
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

    pub fn cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
