//! Request handlers, one module per resource.

pub mod events;
pub mod info;
pub mod kafka;
pub mod metrics;
pub mod schema;
pub mod services;

#[cfg(test)]
pub(crate) mod testing {
    use crate::api::types::ApiResponse;
    use crate::dynamic::{decode, Action, Config};
    use crate::runtime::{App, StoreSizes};
    use http_body_util::BodyExt;
    use std::sync::Arc;

    pub const KAFKA: &str = r#"
asyncapi: 3.0.0
info:
  title: foo
  version: '1.0'
servers:
  broker:
    host: 127.0.0.1:0
    protocol: kafka
channels:
  topic-1:
    messages:
      m:
        contentType: application/json
        payload:
          type: string
"#;

    pub fn app_with(docs: &[(&str, &str)]) -> Arc<App> {
        let app = App::new(StoreSizes::default());
        for (url, raw) in docs {
            let mut config = Config::new("test", url, raw.as_bytes().to_vec());
            config.data = decode(raw.as_bytes()).unwrap();
            app.apply(config, Action::Create);
        }
        app
    }

    pub async fn body_json(resp: ApiResponse) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
