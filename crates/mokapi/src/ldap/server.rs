//! LDAP connection loop.

use super::ber::LdapCodec;
use super::message::{Operation, Request};
use super::service::LdapService;
use crate::runtime::listeners::ConnectionHandler;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

pub struct LdapHandler {
    service: Arc<LdapService>,
}

impl LdapHandler {
    pub fn new(service: Arc<LdapService>) -> Self {
        Self { service }
    }

    /// Answers requests in order until unbind, EOF, a malformed message or
    /// shutdown.
    async fn run<S>(&self, stream: S, peer: &str, shutdown: &mut broadcast::Receiver<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut writer, mut reader) = Framed::new(stream, LdapCodec).split();
        loop {
            let message = tokio::select! {
                m = reader.next() => m,
                _ = shutdown.recv() => break,
            };
            let message = match message {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!("ldap connection {}: {}", peer, e);
                    break;
                }
                None => break,
            };
            let request = match Request::decode(&message) {
                Ok(r) => r,
                Err(e) => {
                    warn!("ldap connection {}: malformed message: {}", peer, e);
                    break;
                }
            };
            if request.operation == Operation::Unbind {
                break;
            }
            for response in self.service.handle(&request) {
                if let Err(e) = writer.send(response).await {
                    debug!("ldap connection {} write error: {}", peer, e);
                    return;
                }
            }
        }
        debug!("ldap connection {} closed", peer);
    }
}

#[async_trait]
impl ConnectionHandler for LdapHandler {
    fn protocol(&self) -> &'static str {
        "ldap"
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        self.run(stream, &peer.to_string(), &mut shutdown).await;
    }
}
