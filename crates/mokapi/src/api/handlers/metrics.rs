use crate::api::types::{ok, query_param, ApiResult};
use crate::monitor::Query;
use crate::runtime::App;

/// GET /api/metrics[?names=a,b] and GET /api/metrics/{namespace}
pub fn handle_query(app: &App, namespace: Option<&str>, query: Option<&str>) -> ApiResult {
    let names = query_param(query, "names")
        .map(|n| {
            n.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let query = Query {
        namespace: namespace.map(String::from),
        names,
        labels: Vec::new(),
    };
    ok(&app.monitor.find_all(&query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::{app_with, body_json};

    #[tokio::test]
    async fn test_query_by_namespace_and_name() {
        let app = app_with(&[]);
        app.monitor.kafka.messages.with_label(&["foo", "topic-1"]).add(2.0);

        let body = body_json(handle_query(&app, Some("kafka"), None).unwrap()).await;
        let samples = body.as_array().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["value"], 2.0);

        let body = body_json(handle_query(&app, None, Some("names=app_start_timestamp")).unwrap()).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let body = body_json(handle_query(&app, Some("ldap"), None).unwrap()).await;
        assert!(body.as_array().unwrap().is_empty());
    }
}
