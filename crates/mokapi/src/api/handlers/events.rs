use crate::api::types::{ok, ApiError, ApiResult};
use crate::events::Traits;
use crate::runtime::App;
use uuid::Uuid;

/// GET /api/events?{traits}
pub fn handle_list(app: &App, query: Option<&str>) -> ApiResult {
    let traits = Traits::from_query(query);
    ok(&app.events.get_events(&traits))
}

/// GET /api/events/{id}
pub fn handle_get(app: &App, id: &str) -> ApiResult {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("invalid event id {id}")))?;
    let event = app
        .events
        .get_event(id)
        .ok_or_else(|| ApiError::NotFound(format!("event {id} not found")))?;
    ok(&event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::{app_with, body_json};
    use crate::events::LogEvent;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_filters_by_traits() {
        let app = app_with(&[]);
        app.events.set_store(10, Traits::new().with_namespace("http"));
        for (name, title) in [("a", "first"), ("b", "second")] {
            app.events
                .push(
                    Arc::new(LogEvent {
                        title: title.to_string(),
                        data: serde_json::json!({}),
                    }),
                    Traits::new().with_namespace("http").with_name(name),
                )
                .unwrap();
        }

        let body = body_json(handle_list(&app, Some("namespace=http&name=b")).unwrap()).await;
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["title"], "second");

        let id = events[0]["id"].as_str().unwrap().to_string();
        let event = body_json(handle_get(&app, &id).unwrap()).await;
        assert_eq!(event["traits"]["name"], "b");
    }

    #[tokio::test]
    async fn test_get_invalid_or_unknown_id() {
        let app = app_with(&[]);
        assert_eq!(
            handle_get(&app, "nope").unwrap_err().status(),
            hyper::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            handle_get(&app, &Uuid::new_v4().to_string()).unwrap_err().status(),
            hyper::StatusCode::NOT_FOUND
        );
    }
}
