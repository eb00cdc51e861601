//! Event stores shared by all protocol handlers.
//!
//! Every handler publishes an `Event` per request into the `EventManager`.
//! Events land in the first store whose traits are a subset of the event's
//! traits; each store is a bounded ring buffer that evicts its oldest event
//! when full and iterates newest first.

mod manager;
mod traits;

pub use manager::{EventError, EventManager, EventStoreInfo};
pub use traits::Traits;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Payload of an event.
pub trait EventData: Debug + Send + Sync {
    /// Short human readable summary used by the dashboard list views.
    fn title(&self) -> String;

    /// Structured representation returned by the management API.
    fn to_json(&self) -> serde_json::Value;
}

/// Immutable event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub traits: Traits,
    pub data: Arc<dyn EventData>,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(data: Arc<dyn EventData>, traits: Traits) -> Self {
        Self {
            id: Uuid::new_v4(),
            traits,
            data,
            time: Utc::now(),
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Event", 5)?;
        s.serialize_field("id", &self.id.to_string())?;
        s.serialize_field("traits", &self.traits)?;
        s.serialize_field("title", &self.data.title())?;
        s.serialize_field("data", &self.data.to_json())?;
        s.serialize_field("time", &self.time.to_rfc3339())?;
        s.end()
    }
}

/// Generic event payload for subsystems without a dedicated type.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub title: String,
    pub data: serde_json::Value,
}

impl EventData for LogEvent {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        self.data.clone()
    }
}
