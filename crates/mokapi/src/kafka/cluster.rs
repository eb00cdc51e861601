//! Broker state of one AsyncAPI service.

use super::error::{ErrorCode, KafkaError};
use super::group::Group;
use super::partition::Partition;
use super::record::Record;
use super::topic::Topic;
use super::validation::Validator;
use crate::events::{EventData, EventManager, Traits};
use crate::monitor::{now_timestamp, Monitor};
use crate::sortedmap::SortedMap;
use crate::spec::asyncapi::Document;
use crate::spec::schema::Resolver;
use base64::Engine;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub const DEFAULT_BROKER: &str = "localhost:9092";

#[derive(Debug, Clone, PartialEq)]
pub struct Broker {
    pub id: i32,
    pub name: String,
    /// Listen address as declared.
    pub address: String,
    /// Host and port advertised in Metadata responses.
    pub host: String,
    pub port: i32,
}

impl Broker {
    fn new(id: i32, name: &str, address: &str) -> Self {
        let (host, port) = match address.rsplit_once(':') {
            Some((h, p)) => (h, p.parse().unwrap_or(9092)),
            None => (address, 9092),
        };
        let host = if host.is_empty() || host == "0.0.0.0" || host == "::" || host == "[::]" {
            "localhost"
        } else {
            host
        };
        Self {
            id,
            name: name.to_string(),
            address: address.to_string(),
            host: host.to_string(),
            port,
        }
    }
}

struct State {
    spec: Arc<Document>,
    brokers: Vec<Broker>,
    topics: SortedMap<String, Arc<Topic>>,
}

/// Topics, partitions and consumer groups of one service.
pub struct Cluster {
    pub name: String,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    state: RwLock<State>,
    groups: Mutex<HashMap<String, Arc<Group>>>,
    appended: Notify,
}

impl Cluster {
    pub fn new(name: &str, monitor: Arc<Monitor>, events: Arc<EventManager>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            monitor,
            events,
            state: RwLock::new(State {
                spec: Arc::new(Document::default()),
                brokers: Vec::new(),
                topics: SortedMap::new(),
            }),
            groups: Mutex::new(HashMap::new()),
            appended: Notify::new(),
        })
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn spec(&self) -> Arc<Document> {
        Arc::clone(&self.state.read().spec)
    }

    // ========================================================================
    // Document changes
    // ========================================================================

    /// Applies a merged document. Existing topics keep their records; topics
    /// missing from the document are retired. Returns the topics whose update
    /// was refused.
    pub fn update(&self, spec: Arc<Document>) -> Vec<KafkaError> {
        let mut refused = Vec::new();
        let mut state = self.state.write();

        let declared = spec.broker_addresses();
        let mut brokers: Vec<Broker> = if declared.is_empty() {
            vec![Broker::new(0, "default", DEFAULT_BROKER)]
        } else {
            declared
                .iter()
                .enumerate()
                .map(|(i, (name, address))| Broker::new(i as i32, name, address))
                .collect()
        };
        // keep ports resolved after binding
        for b in brokers.iter_mut() {
            if let Some(old) = state.brokers.iter().find(|o| o.address == b.address) {
                b.port = old.port;
            }
        }
        let broker_count = brokers.len();
        state.brokers = brokers;

        let mut seen = Vec::new();
        for (key, channel) in spec.channels.iter() {
            let name = channel.topic_name(key).to_string();
            seen.push(name.clone());
            match state.topics.get(&name).cloned() {
                Some(topic) => {
                    if let Err(e) = topic.update(channel.clone(), broker_count) {
                        refused.push(e);
                    }
                }
                None => {
                    debug!("service {}: creating topic {}", self.name, name);
                    let topic = Arc::new(Topic::new(&name, channel.clone(), broker_count));
                    state.topics.set(name, topic);
                }
            }
        }
        for (name, topic) in state.topics.iter() {
            if !seen.contains(name) && !topic.is_retired() {
                info!("service {}: retiring topic {}", self.name, name);
                topic.retire();
            }
        }

        state.spec = spec;
        refused
    }

    pub fn brokers(&self) -> Vec<Broker> {
        self.state.read().brokers.clone()
    }

    pub fn broker_addresses(&self) -> Vec<String> {
        self.state.read().brokers.iter().map(|b| b.address.clone()).collect()
    }

    /// Records the port a broker listener actually bound to.
    pub fn set_broker_port(&self, address: &str, port: u16) {
        let mut state = self.state.write();
        for b in state.brokers.iter_mut().filter(|b| b.address == address) {
            b.port = port as i32;
        }
    }

    pub fn broker_by_address(&self, address: &str) -> Option<Broker> {
        self.state
            .read()
            .brokers
            .iter()
            .find(|b| b.address == address)
            .cloned()
    }

    // ========================================================================
    // Topics
    // ========================================================================

    /// Active topic by name. Retired topics are still returned so their
    /// records can be drained.
    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.state.read().topics.get(name).cloned()
    }

    /// Topics declared by the current document.
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        self.state
            .read()
            .topics
            .values()
            .filter(|t| !t.is_retired())
            .cloned()
            .collect()
    }

    /// Validates and appends records to one partition. Returns the base
    /// offset. Nothing is appended when any record is rejected.
    pub fn produce(&self, topic: &str, partition: i32, records: Vec<Record>) -> Result<i64, KafkaError> {
        let (t, p) = self.partition(topic, partition)?;
        let ids = self.validate(&t, &records, None)?;
        Ok(self.append(&t, p.index, records, ids))
    }

    /// Appends one record as injected through the management API. The
    /// partition is chosen like the Java client when none is given.
    pub fn produce_one(
        &self,
        topic: &str,
        partition: Option<i32>,
        record: Record,
        content_type: Option<&str>,
    ) -> Result<(i32, i64), KafkaError> {
        let t = self
            .topic(topic)
            .ok_or_else(|| KafkaError::UnknownTopic(topic.to_string()))?;
        let partition = partition.unwrap_or_else(|| t.select_partition(record.key.as_deref()));
        let (t, p) = self.partition(topic, partition)?;
        let records = vec![record];
        let ids = self.validate(&t, &records, content_type)?;
        let offset = self.append(&t, p.index, records, ids);
        Ok((partition, offset))
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<(Arc<Topic>, Arc<Partition>), KafkaError> {
        let t = self
            .topic(topic)
            .ok_or_else(|| KafkaError::UnknownTopic(topic.to_string()))?;
        let p = t.partition(partition).ok_or_else(|| KafkaError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })?;
        Ok((t, p))
    }

    fn validate(&self, topic: &Topic, records: &[Record], content_type: Option<&str>) -> Result<Vec<Option<String>>, KafkaError> {
        let spec = self.spec();
        let channel = topic.channel();
        let resolver = spec.schemas().map(Resolver::new).unwrap_or_default();
        let validator = Validator::new(&channel, &spec.default_content_type, resolver);
        records
            .iter()
            .map(|r| validator.validate(r.key.as_deref(), r.value.as_deref(), content_type))
            .collect()
    }

    fn append(&self, topic: &Topic, partition: i32, records: Vec<Record>, ids: Vec<Option<String>>) -> i64 {
        let Some(p) = topic.partition(partition) else {
            return -1;
        };
        let count = records.len();
        let base = p.append(records);

        self.monitor
            .kafka
            .messages
            .with_label(&[self.name.as_str(), topic.name.as_str()])
            .add(count as f64);
        self.monitor
            .kafka
            .last_message
            .with_label(&[self.name.as_str(), topic.name.as_str()])
            .set(now_timestamp());

        let traits = Traits::new()
            .with_namespace("kafka")
            .with_name(&self.name)
            .with("topic", &topic.name);
        for (i, id) in ids.into_iter().enumerate() {
            let Some(record) = p.record(base + i as i64) else {
                continue;
            };
            let event = MessageEvent::new(&record, partition, id);
            if let Err(e) = self.events.push(Arc::new(event), traits.clone()) {
                debug!("unable to log kafka event: {}", e);
            }
        }

        self.update_lags(&topic.name, partition);
        self.appended.notify_waiters();
        base
    }

    pub fn fetch(&self, topic: &str, partition: i32, offset: i64, max_bytes: usize) -> Result<Vec<Record>, KafkaError> {
        let (_, p) = self.partition(topic, partition)?;
        p.read(offset, max_bytes)
    }

    /// Waits until a record is appended anywhere in the cluster or the
    /// timeout elapses.
    pub async fn wait_for_records(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.appended.notified()).await;
    }

    pub fn list_offset(&self, topic: &str, partition: i32, timestamp: i64) -> Result<(i64, i64), KafkaError> {
        let (_, p) = self.partition(topic, partition)?;
        Ok(p.offset_for_time(timestamp))
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Broker id coordinating a group.
    pub fn coordinator(&self, group: &str) -> i32 {
        let count = self.state.read().brokers.len().max(1) as i32;
        coordinator_for(group, count)
    }

    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.lock().get(name).cloned()
    }

    pub fn group_or_create(&self, name: &str) -> Arc<Group> {
        let coordinator = self.coordinator(name);
        let mut groups = self.groups.lock();
        let group = groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name, coordinator));
        Arc::clone(group)
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<_> = self.groups.lock().values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    pub fn delete_group(&self, name: &str) -> Result<(), KafkaError> {
        let group = self
            .groups
            .lock()
            .remove(name)
            .ok_or_else(|| KafkaError::GroupNotFound(name.to_string()))?;
        group.delete();
        Ok(())
    }

    pub fn commit(
        &self,
        group: &Group,
        member_id: &str,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: Option<String>,
    ) -> ErrorCode {
        if let Err(e) = self.partition(topic, partition) {
            return e.code();
        }
        let code = group.commit(member_id, topic, partition, offset, metadata);
        if code.is_ok() {
            self.set_lag(group, topic, partition);
        }
        code
    }

    fn update_lags(&self, topic: &str, partition: i32) {
        for group in self.groups() {
            if group.committed(topic, partition).is_some() {
                self.set_lag(&group, topic, partition);
            }
        }
    }

    fn set_lag(&self, group: &Group, topic: &str, partition: i32) {
        let Some(commit) = group.committed(topic, partition) else {
            return;
        };
        let Ok((_, p)) = self.partition(topic, partition) else {
            return;
        };
        let lag = (p.end_offset() - commit.offset).max(0);
        self.monitor
            .kafka
            .lags
            .with_label(&[
                self.name.as_str(),
                group.name.as_str(),
                topic,
                partition.to_string().as_str(),
            ])
            .set(lag as f64);
    }

    /// Stops group monitors and logs topics retired with undrained records.
    pub fn close(&self) {
        for group in self.groups.lock().drain().map(|(_, g)| g) {
            group.delete();
        }
        for topic in self.state.read().topics.values() {
            if topic.is_retired() && !topic.is_empty() {
                warn!(
                    "service {}: discarding records of retired topic {}",
                    self.name, topic.name
                );
            }
        }
    }
}

/// Java `String.hashCode` so group placement matches other brokers.
fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Masks the sign bit like Kafka's `Utils.toPositive`.
fn coordinator_for(group: &str, broker_count: i32) -> i32 {
    (java_hash(group) & 0x7fff_ffff) % broker_count
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub offset: i64,
    pub partition: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(String, Option<Bytes>)>,
    pub message_id: Option<String>,
}

impl MessageEvent {
    fn new(record: &Record, partition: i32, message_id: Option<String>) -> Self {
        Self {
            offset: record.offset,
            partition,
            key: record.key.clone(),
            value: record.value.clone(),
            headers: record
                .headers
                .iter()
                .map(|h| (h.key.clone(), h.value.clone()))
                .collect(),
            message_id,
        }
    }
}

impl EventData for MessageEvent {
    fn title(&self) -> String {
        match &self.key {
            Some(k) if !k.is_empty() => String::from_utf8_lossy(k).into_owned(),
            _ => self.offset.to_string(),
        }
    }

    fn to_json(&self) -> Value {
        let headers: serde_json::Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().map(bytes_to_json).unwrap_or(Value::Null)))
            .collect();
        json!({
            "offset": self.offset,
            "partition": self.partition,
            "key": self.key.as_ref().map(|k| String::from_utf8_lossy(k).into_owned()),
            "value": self.value.as_ref().map(bytes_to_json),
            "headers": headers,
            "messageId": self.message_id,
        })
    }
}

/// JSON view of record bytes: decoded JSON when valid, a string when UTF-8,
/// base64 otherwise.
pub fn bytes_to_json(data: &Bytes) -> Value {
    if let Ok(v) = serde_json::from_slice::<Value>(data) {
        return v;
    }
    match std::str::from_utf8(data) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::String(base64::engine::general_purpose::STANDARD.encode(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> Arc<Document> {
        let mut doc: Document = serde_yaml::from_str(yaml).unwrap();
        doc.normalize().unwrap();
        Arc::new(doc)
    }

    const DOCUMENT: &str = r#"
asyncapi: 3.0.0
info:
  title: foo
channels:
  topic-1:
    messages:
      m:
        payload:
          type: string
"#;

    fn cluster() -> (Arc<Cluster>, Arc<Monitor>, Arc<EventManager>) {
        let monitor = Arc::new(Monitor::new());
        let events = Arc::new(EventManager::new());
        events.set_store(10, Traits::new().with_namespace("kafka").with_name("foo"));
        let cluster = Cluster::new("foo", Arc::clone(&monitor), Arc::clone(&events));
        assert!(cluster.update(spec(DOCUMENT)).is_empty());
        (cluster, monitor, events)
    }

    fn record(value: &str) -> Record {
        Record::new(
            Some(Bytes::from_static(b"foo")),
            Some(Bytes::copy_from_slice(value.as_bytes())),
        )
    }

    #[tokio::test]
    async fn test_produce_appends_and_counts() {
        let (cluster, monitor, events) = cluster();
        assert_eq!(cluster.produce("topic-1", 0, vec![record(r#""bar""#)]).unwrap(), 0);
        assert_eq!(cluster.produce("topic-1", 0, vec![record(r#""baz""#)]).unwrap(), 1);
        assert_eq!(monitor.kafka.messages.sum(), 2.0);

        let traits = Traits::new().with_namespace("kafka");
        let logged = events.get_events(&traits);
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].data.to_json()["value"], "baz");
        assert_eq!(logged[0].data.to_json()["messageId"], "m");

        let fetched = cluster.fetch("topic-1", 0, 0, 1024).unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_not_appended() {
        let (cluster, monitor, _) = cluster();
        let err = cluster.produce("topic-1", 0, vec![record("123")]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CORRUPT_MESSAGE);
        assert_eq!(monitor.kafka.messages.sum(), 0.0);
        assert_eq!(cluster.topic("topic-1").unwrap().partition(0).unwrap().end_offset(), 0);
    }

    #[tokio::test]
    async fn test_unknown_topic_and_partition() {
        let (cluster, _, _) = cluster();
        assert_eq!(
            cluster.produce("nope", 0, vec![]).unwrap_err().code(),
            ErrorCode::UNKNOWN_TOPIC_OR_PARTITION
        );
        assert!(matches!(
            cluster.fetch("topic-1", 3, 0, 10),
            Err(KafkaError::UnknownPartition { .. })
        ));
    }

    #[tokio::test]
    async fn test_removed_topic_is_retired_and_restored() {
        let (cluster, _, _) = cluster();
        cluster.produce("topic-1", 0, vec![record(r#""bar""#)]).unwrap();
        cluster.update(spec("asyncapi: 3.0.0\ninfo:\n  title: foo\n"));
        assert!(cluster.topics().is_empty());
        assert_eq!(cluster.fetch("topic-1", 0, 0, 100).unwrap().len(), 1);

        cluster.update(spec(DOCUMENT));
        assert_eq!(cluster.topics().len(), 1);
        assert_eq!(cluster.topic("topic-1").unwrap().partition(0).unwrap().end_offset(), 1);
    }

    #[tokio::test]
    async fn test_shrinking_partitions_is_refused() {
        let (cluster, _, _) = cluster();
        let grown = DOCUMENT.replace("topic-1:\n", "topic-1:\n    bindings:\n      kafka:\n        partitions: 3\n");
        assert!(cluster.update(spec(&grown)).is_empty());
        assert_eq!(cluster.topic("topic-1").unwrap().partition_count(), 3);
        let refused = cluster.update(spec(DOCUMENT));
        assert_eq!(refused.len(), 1);
        assert_eq!(cluster.topic("topic-1").unwrap().partition_count(), 3);
    }

    #[tokio::test]
    async fn test_commit_updates_lag() {
        let (cluster, monitor, _) = cluster();
        cluster
            .produce("topic-1", 0, vec![record(r#""a""#), record(r#""b""#), record(r#""c""#)])
            .unwrap();
        let group = cluster.group_or_create("g");
        assert!(cluster.commit(&group, "", "topic-1", 0, 1, None).is_ok());
        assert_eq!(
            monitor.kafka.lags.value(&["foo", "g", "topic-1", "0"]),
            Some(2.0)
        );
        cluster.produce("topic-1", 0, vec![record(r#""d""#)]).unwrap();
        assert_eq!(
            monitor.kafka.lags.value(&["foo", "g", "topic-1", "0"]),
            Some(3.0)
        );
    }

    #[test]
    fn test_java_hash_and_default_broker() {
        assert_eq!(java_hash("hello"), 99162322);
        assert_eq!(java_hash(""), 0);
        let b = Broker::new(0, "default", "0.0.0.0:19092");
        assert_eq!(b.host, "localhost");
        assert_eq!(b.port, 19092);
    }

    #[test]
    fn test_coordinator_is_never_negative() {
        assert_eq!(java_hash("polygenelubricants"), i32::MIN);
        assert_eq!(coordinator_for("polygenelubricants", 3), 0);
        assert_eq!(coordinator_for("hello", 3), 99162322 % 3);
        for count in 1..8 {
            assert!((0..count).contains(&coordinator_for("polygenelubricants", count)));
        }
    }

    #[test]
    fn test_bytes_to_json() {
        assert_eq!(bytes_to_json(&Bytes::from_static(b"\"bar\"")), json!("bar"));
        assert_eq!(bytes_to_json(&Bytes::from_static(b"bar")), json!("bar"));
        assert_eq!(bytes_to_json(&Bytes::from_static(&[0xff])), json!("/w=="));
    }
}
