//! Fragment aggregation shared by all protocol stores.
//!
//! Fragments with the same logical name are kept per source URL and merged
//! in ascending order of their URL base name whenever one changes.

use crate::dynamic::{Config, ConfigData, ConfigInfo};
use crate::events::{EventManager, Traits};
use crate::patch::Patch;
use crate::sortedmap::SortedMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_STORE_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("config {url} does not contain a {namespace} document")]
    WrongKind { url: String, namespace: &'static str },
    #[error("config {url} has no service name")]
    MissingName { url: String },
}

/// Document types a store can aggregate.
pub trait ServiceSpec: Patch + Clone + Send + Sync + 'static {
    fn from_data(data: &ConfigData) -> Option<&Self>;
}

macro_rules! service_spec {
    ($ty:ty, $variant:ident) => {
        impl ServiceSpec for $ty {
            fn from_data(data: &ConfigData) -> Option<&Self> {
                match data {
                    ConfigData::$variant(d) => Some(d),
                    _ => None,
                }
            }
        }
    };
}

service_spec!(crate::spec::openapi::Document, OpenApi);
service_spec!(crate::spec::asyncapi::Document, AsyncApi);
service_spec!(crate::spec::mail::Config, Mail);
service_spec!(crate::spec::directory::Config, Directory);

/// Event store sizes by service name with a `default` fallback.
#[derive(Debug, Clone)]
pub struct StoreSizes(HashMap<String, usize>);

impl StoreSizes {
    pub fn new(sizes: HashMap<String, usize>) -> Self {
        Self(sizes)
    }

    pub fn size_for(&self, name: &str) -> usize {
        self.0
            .get(name)
            .or_else(|| self.0.get("default"))
            .copied()
            .unwrap_or(DEFAULT_STORE_SIZE)
    }
}

impl Default for StoreSizes {
    fn default() -> Self {
        Self(HashMap::from([("default".to_string(), DEFAULT_STORE_SIZE)]))
    }
}

/// Consolidated view of one logical service.
#[derive(Debug, Clone)]
pub struct ServiceInfo<T> {
    pub name: String,
    pub spec: Arc<T>,
    configs: SortedMap<String, Arc<Config>>,
}

impl<T: ServiceSpec> ServiceInfo<T> {
    pub fn configs(&self) -> Vec<ConfigInfo> {
        self.sorted().iter().map(|c| c.info()).collect()
    }

    fn sorted(&self) -> Vec<Arc<Config>> {
        let mut configs: Vec<Arc<Config>> = self.configs.values().cloned().collect();
        configs.sort_by(|a, b| (a.base_name(), &a.url).cmp(&(b.base_name(), &b.url)));
        configs
    }

    fn merge(&self) -> Option<T> {
        let mut merged: Option<T> = None;
        for config in self.sorted() {
            let Some(spec) = T::from_data(&config.data) else {
                continue;
            };
            match merged.as_mut() {
                Some(m) => m.patch(spec),
                None => merged = Some(spec.clone()),
            }
        }
        merged
    }
}

/// Result of adding or removing a fragment.
#[derive(Debug, Clone)]
pub enum Change<T> {
    /// First fragment of a service.
    Created(Arc<T>),
    /// Service merged view changed.
    Updated(Arc<T>),
    /// Last fragment removed.
    Removed,
    /// Fragment was not known.
    Unchanged,
}

pub struct ServiceStore<T> {
    namespace: &'static str,
    services: RwLock<SortedMap<String, ServiceInfo<T>>>,
    events: Arc<EventManager>,
    sizes: StoreSizes,
}

impl<T: ServiceSpec> ServiceStore<T> {
    pub fn new(namespace: &'static str, events: Arc<EventManager>, sizes: StoreSizes) -> Self {
        Self {
            namespace,
            services: RwLock::new(SortedMap::new()),
            events,
            sizes,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn traits(&self, name: &str) -> Traits {
        Traits::new().with_namespace(self.namespace).with_name(name)
    }

    /// Inserts or replaces a fragment and recomputes the merged view.
    pub fn add(&self, config: &Arc<Config>) -> Result<(String, Change<T>), StoreError> {
        let Some(fragment) = T::from_data(&config.data) else {
            return Err(StoreError::WrongKind {
                url: config.url.clone(),
                namespace: self.namespace,
            });
        };
        let name = config.data.name().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(StoreError::MissingName {
                url: config.url.clone(),
            });
        }

        let mut services = self.services.write();
        let first = !services.contains_key(&name);
        if first {
            let traits = self.traits(&name);
            self.events.reset_stores(&traits);
            self.events.set_store(self.sizes.size_for(&name), traits);
            debug!("new {} service {}", self.namespace, name);
        }

        let mut configs = services
            .get(&name)
            .map(|i| i.configs.clone())
            .unwrap_or_default();
        configs.set(config.url.clone(), Arc::clone(config));

        let mut info = ServiceInfo {
            name: name.clone(),
            spec: Arc::new(fragment.clone()),
            configs,
        };
        if let Some(merged) = info.merge() {
            info.spec = Arc::new(merged);
        }
        let spec = Arc::clone(&info.spec);
        services.set(name.clone(), info);

        let change = if first {
            Change::Created(spec)
        } else {
            Change::Updated(spec)
        };
        Ok((name, change))
    }

    /// Removes a fragment. Dropping the last fragment drops the service and
    /// its event stores.
    pub fn remove(&self, config: &Config) -> (String, Change<T>) {
        let mut services = self.services.write();
        let Some(name) = services
            .iter()
            .find(|(_, info)| info.configs.contains_key(&config.url))
            .map(|(name, _)| name.clone())
        else {
            return (config.data.name().unwrap_or_default().to_string(), Change::Unchanged);
        };

        let merged = services.get_mut(&name).and_then(|info| {
            info.configs.delete(&config.url);
            if info.configs.is_empty() {
                return None;
            }
            let merged = info.merge()?;
            info.spec = Arc::new(merged);
            Some(Arc::clone(&info.spec))
        });

        match merged {
            Some(spec) => (name, Change::Updated(spec)),
            None => {
                services.delete(&name);
                self.events.reset_stores(&self.traits(&name));
                debug!("removed {} service {}", self.namespace, name);
                (name, Change::Removed)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceInfo<T>> {
        self.services.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<ServiceInfo<T>> {
        self.services.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::decode;
    use crate::events::LogEvent;
    use crate::spec::directory;

    fn config(url: &str, raw: &str) -> Arc<Config> {
        let mut c = Config::new("test", url, raw.as_bytes().to_vec());
        c.data = decode(raw.as_bytes()).unwrap();
        Arc::new(c)
    }

    fn store() -> (Arc<EventManager>, ServiceStore<directory::Config>) {
        let events = Arc::new(EventManager::new());
        let store = ServiceStore::new("ldap", Arc::clone(&events), StoreSizes::default());
        (events, store)
    }

    #[test]
    fn test_first_add_creates_event_store() {
        let (events, store) = store();
        let (name, change) = store
            .add(&config("a.yaml", "ldap: '1.0'\ninfo: {title: dir}"))
            .unwrap();
        assert_eq!(name, "dir");
        assert!(matches!(change, Change::Created(_)));
        let stores = events.stores();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].size, DEFAULT_STORE_SIZE);
    }

    #[test]
    fn test_patch_order_by_base_name() {
        let (_, store) = store();
        let b = config(
            "file:///x/b.yaml",
            "ldap: '1.0'\ninfo: {title: dir}\nrootDomainNamingContext: dc=b",
        );
        let a = config(
            "file:///y/a.yaml",
            "ldap: '1.0'\ninfo: {title: dir}\nrootDomainNamingContext: dc=a",
        );
        store.add(&b).unwrap();
        store.add(&a).unwrap();
        let info = store.get("dir").unwrap();
        assert_eq!(info.spec.root_domain_naming_context, "dc=b");

        let (_, store2) = self::store();
        store2.add(&a).unwrap();
        store2.add(&b).unwrap();
        assert_eq!(store2.get("dir").unwrap().spec, info.spec);
    }

    #[test]
    fn test_subsequent_add_keeps_events() {
        let (events, store) = store();
        store.add(&config("a.yaml", "ldap: '1.0'\ninfo: {title: dir}")).unwrap();
        let traits = Traits::new().with_namespace("ldap").with_name("dir");
        events
            .push(
                Arc::new(LogEvent {
                    title: "bind".into(),
                    data: serde_json::json!({}),
                }),
                traits.clone(),
            )
            .unwrap();
        store.add(&config("b.yaml", "ldap: '1.0'\ninfo: {title: dir}")).unwrap();
        assert_eq!(events.get_events(&traits).len(), 1);
    }

    #[test]
    fn test_remove_last_fragment_drops_service() {
        let (events, store) = store();
        let a = config("a.yaml", "ldap: '1.0'\ninfo: {title: dir}");
        let b = config("b.yaml", "ldap: '1.0'\ninfo: {title: dir}");
        store.add(&a).unwrap();
        store.add(&b).unwrap();

        let (_, change) = store.remove(&a);
        assert!(matches!(change, Change::Updated(_)));
        assert_eq!(store.len(), 1);

        let (name, change) = store.remove(&b);
        assert_eq!(name, "dir");
        assert!(matches!(change, Change::Removed));
        assert!(store.is_empty());
        assert!(events.stores().is_empty());
    }

    #[test]
    fn test_reapply_is_noop() {
        let (_, store) = store();
        let a = config("a.yaml", "ldap: '1.0'\ninfo: {title: dir}\nentries: {cn=x: {attributes: {cn: x}}}");
        store.add(&a).unwrap();
        let before = store.get("dir").unwrap().spec;
        store.add(&a).unwrap();
        assert_eq!(store.get("dir").unwrap().spec, before);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let (_, store) = store();
        let err = store
            .add(&config("a.yaml", "mail: '1.0'\ninfo: {title: m}"))
            .unwrap_err();
        assert!(matches!(err, StoreError::WrongKind { .. }));
    }
}
