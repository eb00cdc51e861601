//! Record lookup and injection for Kafka topics.

use crate::api::types::{ok, ApiError, ApiResult};
use crate::kafka::cluster::bytes_to_json;
use crate::kafka::record::RecordHeader;
use crate::kafka::{Cluster, Record, Topic};
use crate::runtime::App;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Values are base64 encoded binary.
pub const BINARY_CONTENT_TYPE: &str = "application/vnd.mokapi.kafka.binary+json";
/// String values are XML documents.
pub const XML_CONTENT_TYPE: &str = "application/vnd.mokapi.kafka.xml+json";

#[derive(Debug, Deserialize)]
pub struct ProduceRequest {
    pub records: Vec<ProduceRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ProduceRecord {
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub headers: Map<String, Value>,
    pub partition: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ProduceResponse {
    pub offsets: Vec<RecordResult>,
}

#[derive(Debug, Serialize)]
pub struct RecordResult {
    pub partition: i32,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordResult {
    fn failed(error: String) -> Self {
        Self {
            partition: -1,
            offset: -1,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    Binary,
    Xml,
}

impl Encoding {
    fn from_content_type(content_type: Option<&str>) -> Self {
        let media = content_type
            .and_then(|c| c.split(';').next())
            .map(|c| c.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match media.as_str() {
            BINARY_CONTENT_TYPE => Encoding::Binary,
            XML_CONTENT_TYPE => Encoding::Xml,
            _ => Encoding::Json,
        }
    }
}

fn cluster(app: &App, name: &str) -> Result<Arc<Cluster>, ApiError> {
    app.kafka
        .cluster(name)
        .ok_or_else(|| ApiError::NotFound(format!("kafka service {name} not found")))
}

fn topic(cluster: &Cluster, name: &str) -> Result<Arc<Topic>, ApiError> {
    cluster
        .topic(name)
        .ok_or_else(|| ApiError::NotFound(format!("topic {name} not found")))
}

/// Whether the topic's messages carry JSON payloads. A topic without
/// messages falls back to the document's default content type.
fn json_payloads(topic: &Topic, default_content_type: &str) -> bool {
    let channel = topic.channel();
    if channel.messages.is_empty() {
        return default_content_type.is_empty() || default_content_type.contains("json");
    }
    let json = channel
        .messages
        .values()
        .any(|m| m.content_type(default_content_type).contains("json"));
    json
}

/// Keys and headers are raw text when given as a JSON string.
fn text_or_json(value: &Value) -> Option<Bytes> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Bytes::from(s.clone())),
        other => Some(Bytes::from(other.to_string())),
    }
}

fn encode_value(value: &Value, encoding: Encoding, json: bool) -> Result<Option<Bytes>, String> {
    match (encoding, value) {
        (_, Value::Null) => Ok(None),
        (Encoding::Binary, Value::String(s)) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(|b| Some(Bytes::from(b)))
            .map_err(|e| format!("invalid base64 value: {e}")),
        (Encoding::Binary, _) => Err("binary value must be a base64 string".to_string()),
        (Encoding::Xml, Value::String(s)) => Ok(Some(Bytes::from(s.clone()))),
        (Encoding::Json, Value::String(s)) if !json => Ok(Some(Bytes::from(s.clone()))),
        (_, other) => Ok(Some(Bytes::from(other.to_string()))),
    }
}

/// POST /api/services/kafka/{name}/topics/{topic}[/partitions/{p}]
pub fn handle_produce(
    app: &App,
    name: &str,
    topic_name: &str,
    partition: Option<i32>,
    content_type: Option<&str>,
    body: &[u8],
) -> ApiResult {
    let cluster = cluster(app, name)?;
    let topic = topic(&cluster, topic_name)?;
    let request: ProduceRequest = serde_json::from_slice(body)?;

    let encoding = Encoding::from_content_type(content_type);
    let json = json_payloads(&topic, &cluster.spec().default_content_type);
    let filter = match encoding {
        Encoding::Xml => Some("application/xml"),
        _ => None,
    };

    let offsets = request
        .records
        .iter()
        .map(|r| {
            let value = match encode_value(&r.value, encoding, json) {
                Ok(v) => v,
                Err(e) => return RecordResult::failed(e),
            };
            let mut record = Record::new(text_or_json(&r.key), value);
            record.headers = r
                .headers
                .iter()
                .map(|(k, v)| RecordHeader {
                    key: k.clone(),
                    value: text_or_json(v),
                })
                .collect();
            match cluster.produce_one(topic_name, partition.or(r.partition), record, filter) {
                Ok((partition, offset)) => RecordResult {
                    partition,
                    offset,
                    error: None,
                },
                Err(e) => RecordResult::failed(e.to_string()),
            }
        })
        .collect();

    ok(&ProduceResponse { offsets })
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    pub offset: i64,
    pub key: Value,
    pub value: Value,
    pub headers: Map<String, Value>,
    pub time: String,
}

/// GET /api/services/kafka/{name}/topics/{topic}/partitions/{p}/offsets/{o}
pub fn handle_get_record(app: &App, name: &str, topic_name: &str, partition: i32, offset: i64) -> ApiResult {
    let cluster = cluster(app, name)?;
    let topic = topic(&cluster, topic_name)?;
    let p = topic
        .partition(partition)
        .ok_or_else(|| ApiError::NotFound(format!("partition {partition} not found")))?;
    let record = p
        .record(offset)
        .ok_or_else(|| ApiError::NotFound(format!("offset {offset} not found")))?;

    ok(&RecordView {
        offset: record.offset,
        key: record.key.as_ref().map(bytes_to_json).unwrap_or(Value::Null),
        value: record.value.as_ref().map(bytes_to_json).unwrap_or(Value::Null),
        headers: record
            .headers
            .iter()
            .map(|h| (h.key.clone(), h.value.as_ref().map(bytes_to_json).unwrap_or(Value::Null)))
            .collect(),
        time: record.time.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::{app_with, body_json, KAFKA};
    use serde_json::json;

    #[tokio::test]
    async fn test_produce_and_read_back() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA)]);
        let body = br#"{"records":[{"key":"foo","value":"bar","headers":{"h":"v"}}]}"#;
        let resp = handle_produce(&app, "foo", "topic-1", None, None, body).unwrap();
        assert_eq!(body_json(resp).await, json!({"offsets":[{"partition":0,"offset":0}]}));

        let record = body_json(handle_get_record(&app, "foo", "topic-1", 0, 0).unwrap()).await;
        assert_eq!(record["key"], "foo");
        assert_eq!(record["value"], "bar");
        assert_eq!(record["headers"]["h"], "v");
        assert_eq!(record["offset"], 0);
        app.shutdown();
    }

    #[tokio::test]
    async fn test_produce_invalid_value() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA)]);
        let body = br#"{"records":[{"value":123}]}"#;
        let resp = handle_produce(&app, "foo", "topic-1", Some(0), None, body).unwrap();
        assert_eq!(
            body_json(resp).await,
            json!({"offsets":[{
                "partition": -1,
                "offset": -1,
                "error": "no matching message configuration found for the given value: 123"
            }]})
        );
        assert_eq!(app.monitor.kafka.messages.sum(), 0.0);
        app.shutdown();
    }

    #[tokio::test]
    async fn test_produce_binary_value() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA)]);
        // base64 of "\"hi\""
        let body = br#"{"records":[{"value":"ImhpIg=="}]}"#;
        let resp = handle_produce(&app, "foo", "topic-1", Some(0), Some(BINARY_CONTENT_TYPE), body).unwrap();
        assert_eq!(body_json(resp).await["offsets"][0]["offset"], 0);
        let record = app.kafka.cluster("foo").unwrap().fetch("topic-1", 0, 0, 1024).unwrap();
        assert_eq!(record[0].value.as_deref(), Some(&b"\"hi\""[..]));

        let bad = br#"{"records":[{"value":"%%%"}]}"#;
        let resp = handle_produce(&app, "foo", "topic-1", Some(0), Some(BINARY_CONTENT_TYPE), bad).unwrap();
        assert_eq!(body_json(resp).await["offsets"][0]["partition"], -1);
        app.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_topic_and_offset() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA)]);
        let err = handle_produce(&app, "foo", "nope", None, None, br#"{"records":[]}"#).unwrap_err();
        assert_eq!(err.to_string(), "topic nope not found");
        let err = handle_get_record(&app, "foo", "topic-1", 0, 5).unwrap_err();
        assert_eq!(err.to_string(), "offset 5 not found");
        let err = handle_produce(&app, "foo", "topic-1", None, None, b"{").unwrap_err();
        assert_eq!(err.status(), hyper::StatusCode::BAD_REQUEST);
        app.shutdown();
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(
            encode_value(&json!("bar"), Encoding::Json, true).unwrap().as_deref(),
            Some(&b"\"bar\""[..])
        );
        assert_eq!(
            encode_value(&json!("bar"), Encoding::Json, false).unwrap().as_deref(),
            Some(&b"bar"[..])
        );
        assert_eq!(
            encode_value(&json!("<a/>"), Encoding::Xml, true).unwrap().as_deref(),
            Some(&b"<a/>"[..])
        );
        assert_eq!(encode_value(&Value::Null, Encoding::Json, true).unwrap(), None);
        assert!(encode_value(&json!(1), Encoding::Binary, true).is_err());
        assert_eq!(
            Encoding::from_content_type(Some("application/vnd.mokapi.kafka.xml+json; charset=utf-8")),
            Encoding::Xml
        );
    }
}
