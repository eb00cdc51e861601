//! Ring-buffer event stores and the manager that routes events into them.

use super::{Event, EventData, Traits};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Errors returned by the event manager
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event traits must not be empty")]
    EmptyTraits,
    #[error("no event store found for traits {0}")]
    NoStore(Traits),
}

struct EventStore {
    size: usize,
    traits: Traits,
    events: VecDeque<Event>,
}

impl EventStore {
    fn push(&mut self, event: Event) {
        if self.size == 0 {
            return;
        }
        if self.events.len() >= self.size {
            self.events.pop_back();
        }
        self.events.push_front(event);
    }
}

/// Summary of a configured store.
#[derive(Debug, Clone, Serialize)]
pub struct EventStoreInfo {
    pub traits: Traits,
    pub size: usize,
    pub count: usize,
}

/// Ordered list of event stores guarded by one mutex.
#[derive(Default)]
pub struct EventManager {
    stores: Mutex<Vec<EventStore>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a store. A store with identical traits is left untouched.
    pub fn set_store(&self, size: usize, traits: Traits) {
        let mut stores = self.stores.lock();
        if stores.iter().any(|s| s.traits == traits) {
            return;
        }
        debug!("adding event store {} with size {}", traits, size);
        stores.push(EventStore {
            size,
            traits,
            events: VecDeque::with_capacity(size.min(1024)),
        });
    }

    /// Record an event in the first store whose traits it carries.
    pub fn push(&self, data: Arc<dyn EventData>, traits: Traits) -> Result<Event, EventError> {
        if traits.is_empty() {
            return Err(EventError::EmptyTraits);
        }
        let mut stores = self.stores.lock();
        let store = stores
            .iter_mut()
            .find(|s| traits.contains(&s.traits))
            .ok_or_else(|| EventError::NoStore(traits.clone()))?;
        let event = Event::new(data, traits);
        store.push(event.clone());
        Ok(event)
    }

    /// Events, newest first per store, whose traits include every pair of `filter`.
    pub fn get_events(&self, filter: &Traits) -> Vec<Event> {
        let stores = self.stores.lock();
        let mut events: Vec<Event> = stores
            .iter()
            .flat_map(|s| s.events.iter())
            .filter(|e| filter.matches(&e.traits))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.time.cmp(&a.time));
        events
    }

    pub fn get_event(&self, id: Uuid) -> Option<Event> {
        let stores = self.stores.lock();
        stores
            .iter()
            .flat_map(|s| s.events.iter())
            .find(|e| e.id == id)
            .cloned()
    }

    /// Drop every store whose traits include every pair of `filter`.
    pub fn reset_stores(&self, filter: &Traits) {
        let mut stores = self.stores.lock();
        let before = stores.len();
        stores.retain(|s| !s.traits.contains(filter));
        if stores.len() != before {
            debug!("removed {} event store(s) for {}", before - stores.len(), filter);
        }
    }

    pub fn stores(&self) -> Vec<EventStoreInfo> {
        self.stores
            .lock()
            .iter()
            .map(|s| EventStoreInfo {
                traits: s.traits.clone(),
                size: s.size,
                count: s.events.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogEvent;

    fn data(title: &str) -> Arc<dyn EventData> {
        Arc::new(LogEvent {
            title: title.to_string(),
            data: serde_json::json!({}),
        })
    }

    #[test]
    fn test_push_requires_traits() {
        let m = EventManager::new();
        assert!(matches!(
            m.push(data("x"), Traits::new()),
            Err(EventError::EmptyTraits)
        ));
    }

    #[test]
    fn test_push_without_store_fails() {
        let m = EventManager::new();
        let err = m
            .push(data("x"), Traits::new().with_namespace("http"))
            .unwrap_err();
        assert!(err.to_string().contains("no event store"));
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let m = EventManager::new();
        let traits = Traits::new().with_namespace("http").with_name("foo");
        m.set_store(2, traits.clone());
        m.push(data("1"), traits.clone()).unwrap();
        m.push(data("2"), traits.clone()).unwrap();
        m.push(data("3"), traits.clone()).unwrap();

        let events = m.get_events(&Traits::new().with_namespace("http"));
        let titles: Vec<_> = events.iter().map(|e| e.data.title()).collect();
        assert_eq!(titles, vec!["3", "2"]);
    }

    #[test]
    fn test_event_goes_to_first_matching_store() {
        let m = EventManager::new();
        m.set_store(10, Traits::new().with_namespace("http").with_name("foo"));
        m.set_store(10, Traits::new().with_namespace("http"));

        let event_traits = Traits::new()
            .with_namespace("http")
            .with_name("foo")
            .with("path", "/pets");
        m.push(data("a"), event_traits).unwrap();
        m.push(data("b"), Traits::new().with_namespace("http").with_name("bar"))
            .unwrap();

        let stores = m.stores();
        assert_eq!(stores[0].count, 1);
        assert_eq!(stores[1].count, 1);
    }

    #[test]
    fn test_set_store_is_idempotent() {
        let m = EventManager::new();
        let traits = Traits::new().with_namespace("kafka").with_name("foo");
        m.set_store(5, traits.clone());
        m.set_store(5, traits);
        assert_eq!(m.stores().len(), 1);
    }

    #[test]
    fn test_reset_stores() {
        let m = EventManager::new();
        m.set_store(5, Traits::new().with_namespace("kafka").with_name("foo"));
        m.set_store(5, Traits::new().with_namespace("kafka").with_name("bar"));
        m.reset_stores(&Traits::new().with_namespace("kafka").with_name("foo"));
        let stores = m.stores();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].traits.name(), Some("bar"));
    }

    #[test]
    fn test_get_event_by_id() {
        let m = EventManager::new();
        let traits = Traits::new().with_namespace("ldap");
        m.set_store(5, traits.clone());
        let event = m.push(data("bind"), traits).unwrap();
        assert_eq!(m.get_event(event.id).unwrap().data.title(), "bind");
    }
}
