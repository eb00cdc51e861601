//! Service summaries and per-protocol detail views.

use crate::api::types::{ok, ApiError, ApiResult};
use crate::dynamic::ConfigInfo;
use crate::kafka::{Cluster, GroupSnapshot};
use crate::monitor::{Query, Sample};
use crate::runtime::App;
use crate::spec::{mail, openapi, Info};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metrics: Vec<Sample>,
}

impl ServiceSummary {
    fn new(app: &App, kind: &'static str, name: &str, info: &Info) -> Self {
        Self {
            name: name.to_string(),
            description: info.description.clone(),
            version: info.version.clone(),
            kind,
            metrics: app.monitor.find_all(&Query::namespace(kind).with_label("service", name)),
        }
    }
}

/// GET /api/services
pub fn handle_list(app: &App) -> ApiResult {
    let mut list = Vec::new();
    for s in app.http.list() {
        list.push(ServiceSummary::new(app, "http", &s.name, &s.spec.info));
    }
    for s in app.kafka.list() {
        list.push(ServiceSummary::new(app, "kafka", &s.name, &s.spec.info));
    }
    for s in app.mail.list() {
        list.push(ServiceSummary::new(app, "mail", &s.name, &s.spec.info));
    }
    for s in app.ldap.list() {
        list.push(ServiceSummary::new(app, "ldap", &s.name, &s.spec.info));
    }
    ok(&list)
}

fn not_found(kind: &str, name: &str) -> ApiError {
    ApiError::NotFound(format!("{kind} service {name} not found"))
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Serialize)]
struct HttpDetail<'a> {
    #[serde(flatten)]
    summary: ServiceSummary,
    servers: &'a [openapi::Server],
    paths: Value,
    configs: Vec<ConfigInfo>,
}

/// GET /api/services/http/{name}
pub fn handle_http(app: &App, name: &str) -> ApiResult {
    let info = app.http.get(name).ok_or_else(|| not_found("http", name))?;
    ok(&HttpDetail {
        summary: ServiceSummary::new(app, "http", name, &info.spec.info),
        servers: &info.spec.servers,
        paths: serde_json::to_value(&info.spec.paths).unwrap_or_default(),
        configs: info.configs(),
    })
}

// =============================================================================
// Kafka
// =============================================================================

#[derive(Debug, Serialize)]
struct KafkaDetail {
    #[serde(flatten)]
    summary: ServiceSummary,
    servers: Vec<BrokerView>,
    topics: Vec<TopicView>,
    groups: Vec<GroupView>,
    configs: Vec<ConfigInfo>,
}

#[derive(Debug, Serialize)]
struct BrokerView {
    id: i32,
    name: String,
    host: String,
    port: i32,
}

#[derive(Debug, Serialize)]
struct TopicView {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    partitions: Vec<PartitionView>,
    messages: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartitionView {
    id: i32,
    start_offset: i64,
    offset: i64,
    leader: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupView {
    name: String,
    state: &'static str,
    generation: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leader: Option<String>,
    coordinator: i32,
    members: Vec<MemberView>,
    /// Lag per topic and partition.
    lags: BTreeMap<String, BTreeMap<i32, i64>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberView {
    name: String,
    client_id: String,
    client_host: String,
    partitions: BTreeMap<String, Vec<i32>>,
}

fn group_view(cluster: &Cluster, g: GroupSnapshot) -> GroupView {
    let mut lags: BTreeMap<String, BTreeMap<i32, i64>> = BTreeMap::new();
    for ((topic, partition), committed) in &g.commits {
        let end = cluster
            .topic(topic)
            .and_then(|t| t.partition(*partition))
            .map(|p| p.end_offset())
            .unwrap_or(*committed);
        lags.entry(topic.clone())
            .or_default()
            .insert(*partition, (end - committed).max(0));
    }
    GroupView {
        name: g.name,
        state: g.state.as_str(),
        generation: g.generation_id,
        protocol: g.protocol_name,
        leader: g.leader,
        coordinator: g.coordinator,
        members: g
            .members
            .into_iter()
            .map(|m| MemberView {
                name: m.id,
                client_id: m.client_id,
                client_host: m.client_host,
                partitions: m.partitions,
            })
            .collect(),
        lags,
    }
}

/// GET /api/services/kafka/{name}
pub fn handle_kafka(app: &App, name: &str) -> ApiResult {
    let info = app.kafka.get(name).ok_or_else(|| not_found("kafka", name))?;
    let cluster = app.kafka.cluster(name).ok_or_else(|| not_found("kafka", name))?;

    let topics = cluster
        .topics()
        .iter()
        .map(|t| {
            let channel = t.channel();
            TopicView {
                name: t.name.clone(),
                description: channel.description.clone(),
                partitions: t
                    .partitions()
                    .iter()
                    .map(|p| PartitionView {
                        id: p.index,
                        start_offset: p.start_offset(),
                        offset: p.end_offset(),
                        leader: p.leader,
                    })
                    .collect(),
                messages: serde_json::to_value(&channel.messages).unwrap_or_default(),
            }
        })
        .collect();

    ok(&KafkaDetail {
        summary: ServiceSummary::new(app, "kafka", name, &info.spec.info),
        servers: cluster
            .brokers()
            .into_iter()
            .map(|b| BrokerView {
                id: b.id,
                name: b.name,
                host: b.host,
                port: b.port,
            })
            .collect(),
        topics,
        groups: cluster
            .groups()
            .iter()
            .map(|g| group_view(&cluster, g.snapshot()))
            .collect(),
        configs: info.configs(),
    })
}

// =============================================================================
// Mail
// =============================================================================

#[derive(Debug, Serialize)]
struct MailDetail<'a> {
    #[serde(flatten)]
    summary: ServiceSummary,
    servers: &'a [mail::Server],
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<&'a mail::Settings>,
    mailboxes: Vec<MailboxView>,
    rules: &'a [mail::Rule],
    configs: Vec<ConfigInfo>,
}

#[derive(Debug, Serialize)]
struct MailboxView {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    folders: Vec<FolderView>,
}

#[derive(Debug, Serialize)]
struct FolderView {
    name: String,
    messages: usize,
    unseen: usize,
}

/// GET /api/services/mail/{name}
pub fn handle_mail(app: &App, name: &str) -> ApiResult {
    let info = app.mail.get(name).ok_or_else(|| not_found("mail", name))?;
    let service = app.mail.service(name).ok_or_else(|| not_found("mail", name))?;

    let mut mailboxes: Vec<MailboxView> = service
        .mailboxes()
        .iter()
        .map(|m| MailboxView {
            name: m.name.clone(),
            username: m.username(),
            description: m.description(),
            folders: m
                .folder_names()
                .iter()
                .filter_map(|f| m.status(f).ok())
                .map(|s| FolderView {
                    name: s.name,
                    messages: s.messages,
                    unseen: s.unseen,
                })
                .collect(),
        })
        .collect();
    mailboxes.sort_by(|a, b| a.name.cmp(&b.name));

    ok(&MailDetail {
        summary: ServiceSummary::new(app, "mail", name, &info.spec.info),
        servers: &info.spec.servers,
        settings: info.spec.settings.as_ref(),
        mailboxes,
        rules: &info.spec.rules,
        configs: info.configs(),
    })
}

// =============================================================================
// LDAP
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LdapDetail {
    #[serde(flatten)]
    summary: ServiceSummary,
    address: String,
    root_domain_naming_context: String,
    entries: Vec<EntryView>,
    configs: Vec<ConfigInfo>,
}

#[derive(Debug, Serialize)]
struct EntryView {
    dn: String,
    attributes: BTreeMap<String, Vec<String>>,
}

/// GET /api/services/ldap/{name}
pub fn handle_ldap(app: &App, name: &str) -> ApiResult {
    let info = app.ldap.get(name).ok_or_else(|| not_found("ldap", name))?;
    let entries = info
        .spec
        .normalized_entries()
        .into_iter()
        .map(|(_, e)| EntryView {
            dn: e.dn,
            attributes: e
                .attributes
                .into_iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("userPassword"))
                .collect(),
        })
        .collect();

    ok(&LdapDetail {
        summary: ServiceSummary::new(app, "ldap", name, &info.spec.info),
        address: info.spec.address(),
        root_domain_naming_context: info.spec.root_domain_naming_context.clone(),
        entries,
        configs: info.configs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::{app_with, body_json, KAFKA};
    use crate::kafka::Record;
    use bytes::Bytes;

    const LDAP: &str = r#"
ldap: '1.0'
info:
  title: dir
server:
  address: 127.0.0.1:0
rootDomainNamingContext: dc=mokapi,dc=io
entries:
  cn=alice,dc=mokapi,dc=io:
    attributes:
      cn: alice
      userPassword: secret
"#;

    #[tokio::test]
    async fn test_list_services() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA), ("file:///dir.yaml", LDAP)]);
        let body = body_json(handle_list(&app).unwrap()).await;
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], "foo");
        assert_eq!(list[0]["type"], "kafka");
        assert_eq!(list[0]["version"], "1.0");
        assert_eq!(list[1]["type"], "ldap");
        app.shutdown();
    }

    #[tokio::test]
    async fn test_kafka_detail_reports_offsets() {
        let app = app_with(&[("file:///kafka.yaml", KAFKA)]);
        let cluster = app.kafka.cluster("foo").unwrap();
        cluster
            .produce_one(
                "topic-1",
                Some(0),
                Record::new(None, Some(Bytes::from_static(b"\"a\""))),
                None,
            )
            .unwrap();

        let body = body_json(handle_kafka(&app, "foo").unwrap()).await;
        assert_eq!(body["topics"][0]["name"], "topic-1");
        assert_eq!(body["topics"][0]["partitions"][0]["offset"], 1);
        assert_eq!(body["topics"][0]["partitions"][0]["startOffset"], 0);
        assert_eq!(body["servers"][0]["host"], "127.0.0.1");
        assert_eq!(body["configs"][0]["url"], "file:///kafka.yaml");
        let metrics = body["metrics"].as_array().unwrap();
        assert!(!metrics.is_empty());
        app.shutdown();
    }

    #[tokio::test]
    async fn test_ldap_detail_hides_passwords() {
        let app = app_with(&[("file:///dir.yaml", LDAP)]);
        let body = body_json(handle_ldap(&app, "dir").unwrap()).await;
        assert_eq!(body["rootDomainNamingContext"], "dc=mokapi,dc=io");
        let attributes = &body["entries"][0]["attributes"];
        assert_eq!(attributes["cn"], serde_json::json!(["alice"]));
        assert!(attributes.get("userPassword").is_none());
        app.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let app = app_with(&[]);
        let err = handle_http(&app, "nope").unwrap_err();
        assert_eq!(err.status(), hyper::StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "http service nope not found");
    }
}
