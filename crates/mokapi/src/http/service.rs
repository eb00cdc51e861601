//! Mock responses for one OpenAPI service.

use super::path;
use crate::events::{EventData, EventManager, Traits};
use crate::monitor::{now_timestamp, Monitor};
use crate::spec::openapi::{Document, MediaType, Operation};
use crate::spec::schema::{format_errors, Resolver};
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Protocol independent view of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn url(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Bytes::from(message.to_string()),
        }
    }
}

pub struct HttpService {
    pub name: String,
    monitor: Arc<Monitor>,
    events: Arc<EventManager>,
    spec: RwLock<Arc<Document>>,
}

impl HttpService {
    pub fn new(name: &str, monitor: Arc<Monitor>, events: Arc<EventManager>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            monitor,
            events,
            spec: RwLock::new(Arc::new(Document::default())),
        })
    }

    pub fn update(&self, spec: Arc<Document>) {
        *self.spec.write() = spec;
    }

    pub fn spec(&self) -> Arc<Document> {
        Arc::clone(&self.spec.read())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.spec.read().addresses()
    }

    /// Request path relative to the matching server base path. Servers
    /// without a base path see the full path.
    fn relative_path<'a>(spec: &Document, path: &'a str) -> Option<&'a str> {
        if spec.servers.is_empty() {
            return Some(path);
        }
        let mut fallback = None;
        for server in &spec.servers {
            let base = server.base_path();
            if base.is_empty() {
                fallback = Some(path);
                continue;
            }
            if let Some(rest) = path.strip_prefix(base) {
                if rest.is_empty() || rest.starts_with('/') {
                    return Some(rest);
                }
            }
        }
        fallback
    }

    /// Answers `request` when one of the service's paths matches it.
    pub fn handle<R: Rng + ?Sized>(&self, request: &HttpRequest, rng: &mut R) -> Option<MockResponse> {
        let started = Instant::now();
        let spec = self.spec();
        let relative = Self::relative_path(&spec, &request.path)?;
        let relative = if relative.is_empty() { "/" } else { relative };
        let (template, params) = path::find(spec.paths.keys().map(String::as_str), relative)?;
        let endpoint = format!("{} {}", request.method.to_ascii_uppercase(), template);

        let response = match spec.paths.get(template).and_then(|item| item.operation(&request.method)) {
            Some(operation) => respond(&spec, operation, request, rng),
            None => MockResponse::error(
                405,
                &format!("method {} not defined for path {}", request.method, template),
            ),
        };

        let name = self.name.as_str();
        self.monitor.http.requests_total.with_label(&[name, &endpoint]).inc();
        self.monitor
            .http
            .last_request
            .with_label(&[name, &endpoint])
            .set(now_timestamp());
        if response.status >= 400 {
            self.monitor
                .http
                .requests_errors_total
                .with_label(&[name, &endpoint])
                .inc();
        }

        let mut parameters: Vec<Value> = params
            .iter()
            .map(|(k, v)| json!({ "name": k, "type": "path", "value": v }))
            .collect();
        if let Some(query) = &request.query {
            parameters.extend(
                path::parse_query(query)
                    .into_iter()
                    .map(|(k, v)| json!({ "name": k, "type": "query", "value": v })),
            );
        }
        let event = HttpEvent {
            method: request.method.to_ascii_uppercase(),
            url: request.url(),
            parameters,
            request_body: String::from_utf8_lossy(&request.body).into_owned(),
            status: response.status,
            response_headers: response.headers.clone(),
            response_body: String::from_utf8_lossy(&response.body).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let traits = Traits::new().with_namespace("http").with_name(name);
        if let Err(e) = self.events.push(Arc::new(event), traits) {
            debug!("unable to log http event: {}", e);
        }
        Some(response)
    }
}

/// Chooses the response content type honouring `Accept`.
fn negotiate<'a>(
    content: impl Iterator<Item = (&'a String, &'a MediaType)>,
    accept: Option<&str>,
) -> Option<(&'a String, &'a MediaType)> {
    let content: Vec<_> = content.collect();
    let accepted = accept.and_then(|accept| {
        accept.split(',').find_map(|range| {
            let range = range.split(';').next().unwrap_or("").trim();
            if range.is_empty() || range == "*/*" {
                return None;
            }
            content.iter().copied().find(|(ct, _)| match range.strip_suffix("/*") {
                Some(prefix) => ct.starts_with(prefix),
                None => ct.eq_ignore_ascii_case(range),
            })
        })
    });
    accepted.or_else(|| content.first().copied())
}

fn respond<R: Rng + ?Sized>(
    spec: &Document,
    operation: &Operation,
    request: &HttpRequest,
    rng: &mut R,
) -> MockResponse {
    let resolver = spec.schemas().map(Resolver::new).unwrap_or_default();

    if let Some(body) = &operation.request_body {
        if body.required && request.body.is_empty() {
            return MockResponse::error(400, "request body is required");
        }
        let content_type = request.header("Content-Type").unwrap_or("application/json");
        let schema = body
            .content
            .iter()
            .find(|(ct, _)| content_type.starts_with(ct.as_str()))
            .and_then(|(_, m)| m.schema.as_ref());
        if let (Some(schema), false) = (schema, request.body.is_empty()) {
            if content_type.contains("json") {
                let value: Value = match serde_json::from_slice(&request.body) {
                    Ok(v) => v,
                    Err(e) => return MockResponse::error(400, &format!("invalid json: {e}")),
                };
                if let Err(errors) = schema.validate_with(&value, &resolver) {
                    return MockResponse::error(400, &format!("request body: {}", format_errors(&errors)));
                }
            }
        }
    }

    let Some((status, response)) = operation.success_response() else {
        return MockResponse::error(500, "no success response defined");
    };

    let mut headers = Vec::new();
    for (name, header) in response.headers.iter() {
        if let Some(schema) = &header.schema {
            let value = match schema.example_with(rng, &resolver) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            headers.push((name.clone(), value));
        }
    }

    let Some((content_type, media)) = negotiate(response.content.iter(), request.header("Accept")) else {
        return MockResponse {
            status,
            headers,
            body: Bytes::new(),
        };
    };
    let value = match (&media.example, &media.schema) {
        (Some(example), _) => example.clone(),
        (None, Some(schema)) => schema.example_with(rng, &resolver),
        (None, None) => Value::Null,
    };
    let body = match value {
        Value::String(s) if !content_type.contains("json") => s,
        Value::Null if media.schema.is_none() => String::new(),
        other => other.to_string(),
    };
    headers.push(("Content-Type".to_string(), content_type.clone()));
    MockResponse {
        status,
        headers,
        body: Bytes::from(body),
    }
}

/// Event logged per HTTP request.
#[derive(Debug)]
pub struct HttpEvent {
    pub method: String,
    pub url: String,
    pub parameters: Vec<Value>,
    pub request_body: String,
    pub status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub duration_ms: u64,
}

impl EventData for HttpEvent {
    fn title(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    fn to_json(&self) -> Value {
        let headers: serde_json::Map<String, Value> = self
            .response_headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        json!({
            "request": {
                "method": self.method,
                "url": self.url,
                "parameters": self.parameters,
                "body": self.request_body,
            },
            "response": {
                "statusCode": self.status,
                "headers": headers,
                "body": self.response_body,
            },
            "duration": self.duration_ms,
        })
    }
}
