//! Directory state and request handling of one LDAP service.

use super::ber::Element;
use super::message::{
    self, Authentication, BindRequest, Operation, Request, ResultCode, Scope, SearchRequest, BIND_RESPONSE,
    SEARCH_RESULT_DONE,
};
use crate::events::{EventData, EventManager, Traits};
use crate::monitor::{now_timestamp, Monitor};
use crate::sortedmap::SortedMap;
use crate::spec::directory::{Config, Entry};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Canonical form of a DN: lower case without blanks around separators.
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .filter(|rdn| !rdn.trim().is_empty())
        .map(|rdn| match rdn.split_once('=') {
            Some((k, v)) => format!("{}={}", k.trim(), v.trim()),
            None => rdn.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

fn parent(dn: &str) -> &str {
    dn.split_once(',').map(|(_, p)| p).unwrap_or("")
}

struct Directory {
    config: Arc<Config>,
    entries: SortedMap<String, Entry>,
}

/// Matching entries of a search with the attributes to return.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub entries: Vec<(String, Vec<(String, Vec<String>)>)>,
    pub code: ResultCode,
    pub message: String,
}

pub struct LdapService {
    pub name: String,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    state: RwLock<Directory>,
}

impl LdapService {
    pub fn new(name: &str, monitor: Arc<Monitor>, events: Arc<EventManager>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            monitor,
            events,
            state: RwLock::new(Directory {
                config: Arc::new(Config::default()),
                entries: SortedMap::new(),
            }),
        })
    }

    pub fn update(&self, config: Arc<Config>) {
        let entries = config
            .normalized_entries()
            .into_iter()
            .map(|(_, e)| (normalize_dn(&e.dn), e))
            .collect();
        let mut state = self.state.write();
        state.entries = entries;
        state.config = config;
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.state.read().config)
    }

    pub fn address(&self) -> String {
        self.state.read().config.address()
    }

    pub fn bind(&self, request: &BindRequest) -> (ResultCode, String) {
        let password = match &request.auth {
            Authentication::Simple(p) => p,
            Authentication::Sasl(mechanism) => {
                return (
                    ResultCode::AUTH_METHOD_NOT_SUPPORTED,
                    format!("SASL mechanism {mechanism} is not supported"),
                )
            }
        };
        if request.name.is_empty() {
            return (ResultCode::SUCCESS, String::new());
        }
        let state = self.state.read();
        let accepted = state
            .entries
            .get(&normalize_dn(&request.name))
            .and_then(|e| e.attribute("userPassword"))
            .map(|passwords| passwords.iter().any(|p| p == password))
            .unwrap_or(false);
        if accepted {
            (ResultCode::SUCCESS, String::new())
        } else {
            (ResultCode::INVALID_CREDENTIALS, "invalid credentials".to_string())
        }
    }

    pub fn search(&self, request: &SearchRequest) -> SearchResult {
        let state = self.state.read();
        let base = normalize_dn(&request.base);
        let root = normalize_dn(&state.config.root_domain_naming_context);

        if base.is_empty() && request.scope == Scope::BaseObject {
            let dse = root_dse(&state.config);
            let entries = if request.filter.matches(&dse) {
                vec![(String::new(), select(&dse, request))]
            } else {
                Vec::new()
            };
            return SearchResult {
                entries,
                code: ResultCode::SUCCESS,
                message: String::new(),
            };
        }

        if !base.is_empty() && base != root && !state.entries.contains_key(&base) {
            return SearchResult {
                entries: Vec::new(),
                code: ResultCode::NO_SUCH_OBJECT,
                message: format!("no such object: {}", request.base),
            };
        }

        let suffix = format!(",{base}");
        let mut entries = Vec::new();
        let mut code = ResultCode::SUCCESS;
        for (dn, entry) in state.entries.iter() {
            let in_scope = match request.scope {
                Scope::BaseObject => *dn == base,
                Scope::SingleLevel => parent(dn) == base,
                Scope::WholeSubtree => base.is_empty() || *dn == base || dn.ends_with(&suffix),
            };
            if !in_scope || !request.filter.matches(entry) {
                continue;
            }
            if request.size_limit > 0 && entries.len() as i64 >= request.size_limit {
                code = ResultCode::SIZE_LIMIT_EXCEEDED;
                break;
            }
            entries.push((entry.dn.clone(), select(entry, request)));
        }
        SearchResult {
            entries,
            code,
            message: String::new(),
        }
    }

    /// Answers one request. Unbind and Abandon produce no response.
    pub fn handle(&self, request: &Request) -> Vec<Element> {
        let started = Instant::now();
        let id = request.id;
        let (operation, responses, code, request_json, response_json) = match &request.operation {
            Operation::Bind(bind) => {
                let (code, text) = self.bind(bind);
                (
                    "Bind",
                    vec![message::result(id, BIND_RESPONSE, code, &text)],
                    code,
                    json!({ "name": bind.name }),
                    json!({ "status": code.name(), "message": text }),
                )
            }
            Operation::Search(search) => {
                let result = self.search(search);
                let mut responses: Vec<Element> = result
                    .entries
                    .iter()
                    .map(|(dn, attrs)| message::search_entry(id, dn, attrs))
                    .collect();
                responses.push(message::result(id, SEARCH_RESULT_DONE, result.code, &result.message));
                let results: Vec<Value> = result
                    .entries
                    .iter()
                    .map(|(dn, attrs)| {
                        let attrs: serde_json::Map<String, Value> =
                            attrs.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                        json!({ "dn": dn, "attributes": attrs })
                    })
                    .collect();
                (
                    "Search",
                    responses,
                    result.code,
                    json!({
                        "baseDN": search.base,
                        "scope": search.scope,
                        "sizeLimit": search.size_limit,
                        "timeLimit": search.time_limit,
                        "filter": search.filter.to_string(),
                        "attributes": search.attributes,
                    }),
                    json!({ "status": result.code.name(), "results": results }),
                )
            }
            Operation::Unbind | Operation::Abandon => return Vec::new(),
            Operation::Unsupported(tag) => {
                debug!("ldap service {}: unsupported operation {:#04x}", self.name, tag);
                let code = ResultCode::UNWILLING_TO_PERFORM;
                (
                    "Unsupported",
                    vec![message::result(
                        id,
                        message::response_tag(*tag),
                        code,
                        "operation not supported",
                    )],
                    code,
                    json!({ "tag": tag }),
                    json!({ "status": code.name() }),
                )
            }
        };

        let name = self.name.as_str();
        self.monitor.ldap.requests_total.with_label(&[name, operation]).inc();
        self.monitor.ldap.last_request.with_label(&[name]).set(now_timestamp());
        if code.is_error() {
            self.monitor
                .ldap
                .requests_errors_total
                .with_label(&[name, operation])
                .inc();
        }

        let event = LdapEvent {
            operation,
            request: request_json,
            response: response_json,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let traits = Traits::new().with_namespace("ldap").with_name(name);
        if let Err(e) = self.events.push(Arc::new(event), traits) {
            debug!("unable to log ldap event: {}", e);
        }
        responses
    }
}

fn root_dse(config: &Config) -> Entry {
    let mut attributes = SortedMap::new();
    attributes.set("objectClass".to_string(), vec!["top".to_string()]);
    if !config.root_domain_naming_context.is_empty() {
        attributes.set(
            "namingContexts".to_string(),
            vec![config.root_domain_naming_context.clone()],
        );
    }
    attributes.set("supportedLDAPVersion".to_string(), vec!["3".to_string()]);
    attributes.set("vendorName".to_string(), vec!["Mokapi".to_string()]);
    Entry {
        dn: String::new(),
        attributes,
    }
}

/// Attributes of `entry` requested by a search: all for an empty list or
/// `*`, none for `1.1`.
fn select(entry: &Entry, request: &SearchRequest) -> Vec<(String, Vec<String>)> {
    let wanted = &request.attributes;
    let all = wanted.is_empty() || wanted.iter().any(|a| a == "*");
    entry
        .attributes
        .iter()
        .filter(|(name, _)| {
            if name.eq_ignore_ascii_case("userPassword") && !wanted.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                return false;
            }
            all || wanted.iter().any(|a| a.eq_ignore_ascii_case(name))
        })
        .map(|(name, values)| {
            let values = if request.types_only { Vec::new() } else { values.clone() };
            (name.clone(), values)
        })
        .collect()
}

/// Event logged per LDAP operation.
#[derive(Debug)]
pub struct LdapEvent {
    pub operation: &'static str,
    pub request: Value,
    pub response: Value,
    pub duration_ms: u64,
}

impl EventData for LdapEvent {
    fn title(&self) -> String {
        match self.operation {
            "Bind" => format!("Bind {}", self.request["name"].as_str().unwrap_or("")),
            "Search" => format!("Search {}", self.request["filter"].as_str().unwrap_or("")),
            other => other.to_string(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "operation": self.operation,
            "request": self.request,
            "response": self.response,
            "duration": self.duration_ms,
        })
    }
}
