//! Management API server.

use crate::api::router::route_request;
use crate::runtime::App;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// JSON API exposing services, events and metrics of an [`App`].
pub struct ApiServer {
    listener: TcpListener,
    app: Arc<App>,
    prefix: Arc<str>,
}

impl ApiServer {
    /// Binds the API listener. `prefix` is the configured API path.
    pub async fn bind(addr: SocketAddr, app: Arc<App>, prefix: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            app,
            prefix: Arc::from(prefix),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), anyhow::Error> {
        info!("API listening on http://{}{}", self.local_addr()?, self.prefix);

        loop {
            let (stream, _) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("API accept error: {}", e);
                        continue;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("API server stopped");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let app = Arc::clone(&self.app);
            let prefix = Arc::clone(&self.prefix);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let app = Arc::clone(&app);
                    let prefix = Arc::clone(&prefix);
                    async move { route_request(req, app, prefix).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("API connection error: {}", e);
                }
            });
        }
    }
}
