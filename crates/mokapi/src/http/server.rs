//! HTTP listener dispatching to every service declared on its address.

use super::service::{HttpRequest, HttpService, MockResponse};
use crate::runtime::listeners::ConnectionHandler;
use crate::sortedmap::SortedMap;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::debug;

/// Running HTTP services by name.
pub type Services = Arc<RwLock<SortedMap<String, Arc<HttpService>>>>;

#[derive(Clone)]
pub struct HttpHandler {
    address: String,
    services: Services,
}

impl HttpHandler {
    pub fn new(address: &str, services: Services) -> Self {
        Self {
            address: address.to_string(),
            services,
        }
    }

    /// Services bound to this handler's address.
    fn candidates(&self) -> Vec<Arc<HttpService>> {
        self.services
            .read()
            .values()
            .filter(|s| s.addresses().contains(&self.address))
            .cloned()
            .collect()
    }

    pub fn dispatch(&self, request: &HttpRequest) -> MockResponse {
        let mut rng = StdRng::from_entropy();
        for service in self.candidates() {
            if let Some(response) = service.handle(request, &mut rng) {
                return response;
            }
        }
        debug!("no http service matches {} {}", request.method, request.path);
        MockResponse {
            status: 404,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Bytes::from(format!("no matching endpoint found: {} {}", request.method, request.path)),
        }
    }
}

async fn handle(handler: HttpHandler, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(c) => c.to_bytes(),
        Err(e) => {
            debug!("failed to read request body: {}", e);
            Bytes::new()
        }
    };
    let request = HttpRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect(),
        body,
    };
    let mock = handler.dispatch(&request);

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(mock.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    for (name, value) in &mock.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    Ok(builder
        .body(Full::new(mock.body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error")))))
}

#[async_trait]
impl ConnectionHandler for HttpHandler {
    fn protocol(&self) -> &'static str {
        "http"
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let io = TokioIo::new(stream);
        let handler = self.clone();
        let service = service_fn(move |req| handle(handler.clone(), req));
        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("http connection {} error: {}", peer, e);
                }
            }
            _ = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                let _ = conn.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::monitor::Monitor;

    fn services(yaml: &str) -> Services {
        let svc = HttpService::new("petstore", Arc::new(Monitor::new()), Arc::new(EventManager::new()));
        svc.update(Arc::new(serde_yaml::from_str(yaml).unwrap()));
        let mut map = SortedMap::new();
        map.set("petstore".to_string(), svc);
        Arc::new(RwLock::new(map))
    }

    const DOCUMENT: &str = r#"
openapi: 3.0.0
info: { title: petstore }
servers: [{ url: "http://localhost:18080" }]
paths:
  /pet/{id}:
    get:
      responses:
        '200':
          description: ok
          content:
            application/json:
              example: { id: 1 }
"#;

    #[test]
    fn test_dispatch_by_address() {
        let handler = HttpHandler::new("0.0.0.0:18080", services(DOCUMENT));
        let request = HttpRequest {
            method: "GET".to_string(),
            path: "/pet/4".to_string(),
            ..Default::default()
        };
        let res = handler.dispatch(&request);
        assert_eq!(res.status, 200);
        assert_eq!(res.body, Bytes::from(r#"{"id":1}"#));

        let other = HttpHandler::new("0.0.0.0:80", services(DOCUMENT));
        assert_eq!(other.dispatch(&request).status, 404);
    }
}
