//! Route dispatch for the management API.

use crate::api::handlers::{events, info, kafka, metrics, schema, services};
use crate::api::types::{collect_body, not_found, ApiError, ApiResponse, ApiResult};
use crate::runtime::App;
use hyper::body::Incoming;
use hyper::{Method, Request};
use std::sync::Arc;
use tracing::debug;

/// Parsed route below `/api/services/kafka/{name}`.
#[derive(Debug, PartialEq, Eq)]
enum KafkaRoute {
    /// /api/services/kafka/{name}
    Service,
    /// /api/services/kafka/{name}/topics/{topic}
    Topic(String),
    /// /api/services/kafka/{name}/topics/{topic}/partitions/{p}
    Partition(String, i32),
    /// /api/services/kafka/{name}/topics/{topic}/partitions/{p}/offsets/{o}
    Record(String, i32, i64),
}

impl KafkaRoute {
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] => Some(KafkaRoute::Service),
            ["topics", topic] => Some(KafkaRoute::Topic(decode(topic))),
            ["topics", topic, "partitions", p] => Some(KafkaRoute::Partition(decode(topic), p.parse().ok()?)),
            ["topics", topic, "partitions", p, "offsets", o] => {
                Some(KafkaRoute::Record(decode(topic), p.parse().ok()?, o.parse().ok()?))
            }
            _ => None,
        }
    }
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Main request router. `prefix` is the configured API path, stripped before
/// matching.
pub async fn route_request(
    req: Request<Incoming>,
    app: Arc<App>,
    prefix: Arc<str>,
) -> Result<ApiResponse, hyper::Error> {
    let method = req.method().clone();
    let full = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("API: {} {}", method, full);

    let Some(path) = strip_prefix(&full, &prefix) else {
        return Ok(not_found());
    };
    let response = route_by_path(&method, path, query.as_deref(), req, app)
        .await
        .unwrap_or_else(ApiError::into_response);
    Ok(response)
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

async fn route_by_path(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    app: Arc<App>,
) -> ApiResult {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };

    // Fast path for fixed routes
    match (method, path) {
        (&Method::GET, "/api/info") => return info::handle_info(&app),
        (&Method::GET, "/api/services") => return services::handle_list(&app),
        (&Method::GET, "/api/events") => return events::handle_list(&app, query),
        (&Method::GET, "/api/metrics") => return metrics::handle_query(&app, None, query),
        (&Method::GET | &Method::POST, "/api/schema/example") => {
            let body = collect_body(req).await?;
            return schema::handle_example(&body);
        }
        (&Method::GET | &Method::POST, "/api/schema/validate") => {
            let body = collect_body(req).await?;
            return schema::handle_validate(&body);
        }
        _ => {}
    }

    if let Some(id) = path.strip_prefix("/api/events/") {
        return match *method {
            Method::GET => events::handle_get(&app, id),
            _ => Err(ApiError::MethodNotAllowed),
        };
    }

    if let Some(namespace) = path.strip_prefix("/api/metrics/") {
        return match *method {
            Method::GET => metrics::handle_query(&app, Some(namespace), query),
            _ => Err(ApiError::MethodNotAllowed),
        };
    }

    if let Some(rest) = path.strip_prefix("/api/services/") {
        return route_service(method, rest, req, app).await;
    }

    Ok(not_found())
}

async fn route_service(method: &Method, path: &str, req: Request<Incoming>, app: Arc<App>) -> ApiResult {
    let segments: Vec<&str> = path.split('/').collect();
    let [kind, name, rest @ ..] = segments.as_slice() else {
        return Ok(not_found());
    };
    let name = decode(name);

    if *kind != "kafka" {
        if !rest.is_empty() {
            return Ok(not_found());
        }
        if *method != Method::GET {
            return Err(ApiError::MethodNotAllowed);
        }
        return match *kind {
            "http" => services::handle_http(&app, &name),
            "mail" => services::handle_mail(&app, &name),
            "ldap" => services::handle_ldap(&app, &name),
            _ => Ok(not_found()),
        };
    }

    let Some(route) = KafkaRoute::parse(rest) else {
        return Ok(not_found());
    };
    match (method, route) {
        (&Method::GET, KafkaRoute::Service) => services::handle_kafka(&app, &name),
        (&Method::GET, KafkaRoute::Record(topic, partition, offset)) => {
            kafka::handle_get_record(&app, &name, &topic, partition, offset)
        }
        (&Method::POST, KafkaRoute::Topic(topic)) => {
            let content_type = content_type(&req);
            let body = collect_body(req).await?;
            kafka::handle_produce(&app, &name, &topic, None, content_type.as_deref(), &body)
        }
        (&Method::POST, KafkaRoute::Partition(topic, partition)) => {
            let content_type = content_type(&req);
            let body = collect_body(req).await?;
            kafka::handle_produce(&app, &name, &topic, Some(partition), content_type.as_deref(), &body)
        }
        (_, KafkaRoute::Record(..)) | (_, KafkaRoute::Service) => Err(ApiError::MethodNotAllowed),
        _ => Ok(not_found()),
    }
}

fn content_type(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_route_parse() {
        assert_eq!(KafkaRoute::parse(&[]), Some(KafkaRoute::Service));
        assert_eq!(
            KafkaRoute::parse(&["topics", "topic-1"]),
            Some(KafkaRoute::Topic("topic-1".into()))
        );
        assert_eq!(
            KafkaRoute::parse(&["topics", "a%2Fb", "partitions", "2"]),
            Some(KafkaRoute::Partition("a/b".into(), 2))
        );
        assert_eq!(
            KafkaRoute::parse(&["topics", "t", "partitions", "0", "offsets", "12"]),
            Some(KafkaRoute::Record("t".into(), 0, 12))
        );
        assert_eq!(KafkaRoute::parse(&["topics", "t", "partitions", "x"]), None);
        assert_eq!(KafkaRoute::parse(&["groups"]), None);
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/api/info", ""), Some("/api/info"));
        assert_eq!(strip_prefix("/mokapi/api/info", "/mokapi"), Some("/api/info"));
        assert_eq!(strip_prefix("/mokapi/api/info", "/mokapi/"), Some("/api/info"));
        assert_eq!(strip_prefix("/mokapi", "/mokapi"), Some("/"));
        assert_eq!(strip_prefix("/mokapiX/api", "/mokapi"), None);
        assert_eq!(strip_prefix("/api/info", "/mokapi"), None);
    }
}
