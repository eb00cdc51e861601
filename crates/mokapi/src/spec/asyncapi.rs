//! AsyncAPI documents (2.x and 3.x channel layouts).
//!
//! 2.x declares messages on `publish`/`subscribe` operations; those are moved
//! into the channel's `messages` map by [`Document::normalize`] so the broker
//! only has to deal with one layout.

use super::schema::Schema;
use super::{split_url, Info};
use crate::patch::{patch_option, patch_replace, Patch};
use crate::sortedmap::SortedMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub asyncapi: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub info: Info,
    pub servers: SortedMap<String, Server>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_content_type: String,
    pub channels: SortedMap<String, Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Components {
    pub schemas: SortedMap<String, Schema>,
    pub messages: SortedMap<String, Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Channel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub bindings: ChannelBindings,
    pub messages: SortedMap<String, Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelBindings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka: Option<TopicBindings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicBindings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_configuration: Option<TopicConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfiguration {
    #[serde(rename = "retention.ms", skip_serializing_if = "Option::is_none")]
    pub retention_ms: Option<i64>,
    #[serde(rename = "retention.bytes", skip_serializing_if = "Option::is_none")]
    pub retention_bytes: Option<i64>,
    #[serde(rename = "segment.ms", skip_serializing_if = "Option::is_none")]
    pub segment_ms: Option<i64>,
    #[serde(rename = "segment.bytes", skip_serializing_if = "Option::is_none")]
    pub segment_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<OperationMessage>,
}

/// `message` of a 2.x operation: either one message or a `oneOf` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationMessage {
    OneOf {
        #[serde(rename = "oneOf")]
        one_of: Vec<Message>,
    },
    Single(Box<Message>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Schema>,
    pub bindings: MessageBindings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageBindings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaMessageBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaMessageBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Schema>,
}

impl Document {
    pub fn schemas(&self) -> Option<&SortedMap<String, Schema>> {
        self.components.as_ref().map(|c| &c.schemas)
    }

    /// Moves 2.x operation messages into `messages` and resolves message
    /// references against `components.messages`.
    pub fn normalize(&mut self) -> Result<(), String> {
        let components = self
            .components
            .as_ref()
            .map(|c| c.messages.clone())
            .unwrap_or_default();

        for (key, channel) in self.channels.iter_mut() {
            let mut collected: Vec<(String, Message)> = Vec::new();
            for (op_name, op) in [("publish", channel.publish.take()), ("subscribe", channel.subscribe.take())] {
                let Some(op) = op else { continue };
                match op.message {
                    Some(OperationMessage::Single(m)) => collected.push((op_name.to_string(), *m)),
                    Some(OperationMessage::OneOf { one_of }) => {
                        for (i, m) in one_of.into_iter().enumerate() {
                            collected.push((format!("{op_name}-{i}"), m));
                        }
                    }
                    None => {}
                }
            }
            for (id, mut message) in collected {
                resolve_message(&mut message, &components)
                    .map_err(|e| format!("channel {key}: {e}"))?;
                let id = if message.name.is_empty() {
                    id
                } else {
                    message.name.clone()
                };
                if !channel.messages.contains_key(&id) {
                    channel.messages.set(id, message);
                }
            }
            for message in channel.messages.values_mut() {
                resolve_message(message, &components)
                    .map_err(|e| format!("channel {key}: {e}"))?;
            }
        }
        Ok(())
    }

    /// Kafka broker addresses declared by the document.
    pub fn broker_addresses(&self) -> Vec<(String, String)> {
        self.servers
            .iter()
            .filter(|(_, s)| s.protocol.is_empty() || s.protocol == "kafka")
            .map(|(name, s)| (name.clone(), s.address().to_string()))
            .collect()
    }
}

fn resolve_message(message: &mut Message, components: &SortedMap<String, Message>) -> Result<(), String> {
    let mut seen: Vec<String> = Vec::new();
    while let Some(reference) = message.reference.take() {
        if seen.contains(&reference) {
            return Err(format!("cyclic message reference {reference}"));
        }
        let name = reference
            .strip_prefix("#/components/messages/")
            .ok_or_else(|| format!("unsupported message reference {reference}"))?;
        let target = components
            .get(name)
            .ok_or_else(|| format!("unresolved message reference {reference}"))?;
        seen.push(reference.clone());
        *message = target.clone();
    }
    Ok(())
}

impl Server {
    /// `host` (3.x) or the authority of `url` (2.x).
    pub fn address(&self) -> &str {
        if !self.host.is_empty() {
            &self.host
        } else {
            split_url(&self.url).1
        }
    }
}

impl Channel {
    /// Topic name: `address` replaces the channel key when present.
    pub fn topic_name<'a>(&'a self, key: &'a str) -> &'a str {
        match self.address.as_deref() {
            Some(a) if !a.is_empty() => a,
            _ => key,
        }
    }

    pub fn partitions(&self) -> i32 {
        self.bindings
            .kafka
            .as_ref()
            .and_then(|k| k.partitions)
            .unwrap_or(1)
    }
}

impl Message {
    pub fn content_type<'a>(&'a self, default: &'a str) -> &'a str {
        if !self.content_type.is_empty() {
            &self.content_type
        } else if !default.is_empty() {
            default
        } else {
            DEFAULT_CONTENT_TYPE
        }
    }

    pub fn key(&self) -> Option<&Schema> {
        self.bindings.kafka.as_ref().and_then(|k| k.key.as_ref())
    }
}

// ============================================================================
// Patch
// ============================================================================

impl Patch for Document {
    fn patch(&mut self, other: &Self) {
        self.asyncapi.patch(&other.asyncapi);
        self.id.patch(&other.id);
        self.info.patch(&other.info);
        self.servers.patch(&other.servers);
        self.default_content_type.patch(&other.default_content_type);
        self.channels.patch(&other.channels);
        patch_option(&mut self.components, &other.components);
    }
}

impl Patch for Server {
    fn patch(&mut self, other: &Self) {
        self.host.patch(&other.host);
        self.url.patch(&other.url);
        self.protocol.patch(&other.protocol);
        self.description.patch(&other.description);
    }
}

impl Patch for Components {
    fn patch(&mut self, other: &Self) {
        self.schemas.patch(&other.schemas);
        self.messages.patch(&other.messages);
    }
}

impl Patch for Channel {
    fn patch(&mut self, other: &Self) {
        patch_replace(&mut self.address, &other.address);
        self.title.patch(&other.title);
        self.description.patch(&other.description);
        patch_option(&mut self.bindings.kafka, &other.bindings.kafka);
        self.messages.patch(&other.messages);
    }
}

impl Patch for TopicBindings {
    fn patch(&mut self, other: &Self) {
        patch_replace(&mut self.partitions, &other.partitions);
        patch_replace(&mut self.replicas, &other.replicas);
        patch_replace(&mut self.topic_configuration, &other.topic_configuration);
    }
}

impl Patch for Message {
    fn patch(&mut self, other: &Self) {
        self.name.patch(&other.name);
        self.title.patch(&other.title);
        self.summary.patch(&other.summary);
        self.content_type.patch(&other.content_type);
        patch_option(&mut self.payload, &other.payload);
        patch_option(&mut self.headers, &other.headers);
        patch_option(&mut self.bindings.kafka, &other.bindings.kafka);
    }
}

impl Patch for KafkaMessageBinding {
    fn patch(&mut self, other: &Self) {
        patch_option(&mut self.key, &other.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2: &str = r#"
asyncapi: '2.6.0'
info:
  title: foo
  version: '1.0'
servers:
  broker:
    url: kafka://localhost:19092
    protocol: kafka
channels:
  topic-1:
    bindings:
      kafka:
        partitions: 2
    subscribe:
      message:
        $ref: '#/components/messages/Str'
components:
  messages:
    Str:
      name: str
      contentType: application/json
      payload:
        type: string
"#;

    #[test]
    fn test_normalize_v2_operation_messages() {
        let mut doc: Document = serde_yaml::from_str(V2).unwrap();
        doc.normalize().unwrap();
        let channel = doc.channels.get("topic-1").unwrap();
        assert!(channel.subscribe.is_none());
        let message = channel.messages.get("str").unwrap();
        assert_eq!(message.content_type(""), "application/json");
        assert!(message.payload.as_ref().unwrap().types.includes("string"));
        assert_eq!(channel.partitions(), 2);
    }

    #[test]
    fn test_one_of_messages() {
        let mut doc: Document = serde_yaml::from_str(
            r#"
asyncapi: '2.0.0'
info: { title: foo }
channels:
  t:
    publish:
      message:
        oneOf:
          - payload: { type: string }
          - payload: { type: integer }
"#,
        )
        .unwrap();
        doc.normalize().unwrap();
        let channel = doc.channels.get("t").unwrap();
        assert_eq!(channel.messages.len(), 2);
        assert!(channel.messages.contains_key("publish-1"));
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let mut doc: Document = serde_yaml::from_str(
            r#"
asyncapi: '3.0.0'
info: { title: foo }
channels:
  t:
    messages:
      m: { $ref: '#/components/messages/missing' }
"#,
        )
        .unwrap();
        assert!(doc.normalize().is_err());
    }

    #[test]
    fn test_address_replaces_topic_name() {
        let doc: Document = serde_yaml::from_str(
            r#"
asyncapi: '3.0.0'
info: { title: foo }
channels:
  users:
    address: user-signedup
"#,
        )
        .unwrap();
        let channel = doc.channels.get("users").unwrap();
        assert_eq!(channel.topic_name("users"), "user-signedup");
        assert_eq!(channel.partitions(), 1);
    }

    #[test]
    fn test_broker_addresses() {
        let doc: Document = serde_yaml::from_str(V2).unwrap();
        assert_eq!(
            doc.broker_addresses(),
            vec![("broker".to_string(), "localhost:19092".to_string())]
        );
    }

    #[test]
    fn test_patch_partitions_last_wins() {
        let mut a: Document = serde_yaml::from_str(V2).unwrap();
        let b: Document = serde_yaml::from_str(
            r#"
asyncapi: '2.6.0'
info: { title: foo }
channels:
  topic-1:
    bindings: { kafka: { partitions: 3 } }
"#,
        )
        .unwrap();
        a.patch(&b);
        assert_eq!(a.channels.get("topic-1").unwrap().partitions(), 3);
    }
}
