use crate::api::types::{ok, ApiResult};
use crate::runtime::App;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub version: String,
    pub build_time: String,
    pub active_services: Vec<&'static str>,
    pub search: SearchInfo,
}

#[derive(Debug, Serialize)]
pub struct SearchInfo {
    pub enabled: bool,
}

/// GET /api/info
pub fn handle_info(app: &App) -> ApiResult {
    ok(&AppInfo {
        version: app.version.clone(),
        build_time: option_env!("MOKAPI_BUILD_TIME").unwrap_or_default().to_string(),
        active_services: app.active_services(),
        search: SearchInfo { enabled: false },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testing::{app_with, body_json};

    #[tokio::test]
    async fn test_info_reports_active_services() {
        let app = app_with(&[(
            "file:///dir.yaml",
            "ldap: '1.0'\ninfo:\n  title: dir\nserver:\n  address: 127.0.0.1:0\n",
        )]);
        let body = body_json(handle_info(&app).unwrap()).await;
        assert_eq!(body["version"], crate::runtime::VERSION);
        assert_eq!(body["activeServices"], serde_json::json!(["ldap"]));
        assert_eq!(body["search"]["enabled"], false);
        app.shutdown();
    }
}
