//! TCP listeners shared by services on the same address.
//!
//! Each address runs one accept loop with its own broadcast shutdown channel
//! and spawns a task per connection. The listener stops when the last service
//! using it is released.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("address {address} is already used by a {protocol} listener")]
    ProtocolConflict { address: String, protocol: &'static str },
}

/// Serves one accepted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    fn protocol(&self) -> &'static str;

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, shutdown: broadcast::Receiver<()>);
}

struct Listener {
    protocol: &'static str,
    local_addr: SocketAddr,
    services: HashSet<String>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Owns every protocol listener of the process.
pub struct ListenerManager {
    listeners: RwLock<HashMap<String, Listener>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `service` on `address`, binding a listener on first use.
    ///
    /// Returns the bound local address.
    pub fn bind(
        &self,
        address: &str,
        service: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<SocketAddr, ListenerError> {
        let mut listeners = self.listeners.write();
        if let Some(existing) = listeners.get_mut(address) {
            if existing.protocol != handler.protocol() {
                return Err(ListenerError::ProtocolConflict {
                    address: address.to_string(),
                    protocol: existing.protocol,
                });
            }
            existing.services.insert(service.to_string());
            return Ok(existing.local_addr);
        }

        let std_listener = std::net::TcpListener::bind(address)
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
            .map_err(|e| ListenerError::Bind(address.to_string(), e))?;
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ListenerError::Bind(address.to_string(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ListenerError::Bind(address.to_string(), e))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let protocol = handler.protocol();
        info!("{} listener bound to {}", protocol, local_addr);
        tokio::spawn(accept_loop(listener, handler, shutdown_tx.clone()));

        listeners.insert(
            address.to_string(),
            Listener {
                protocol,
                local_addr,
                services: HashSet::from([service.to_string()]),
                shutdown_tx,
            },
        );
        Ok(local_addr)
    }

    /// Removes `service` from `address`; the listener stops when unused.
    pub fn release(&self, address: &str, service: &str) {
        let mut listeners = self.listeners.write();
        let Some(listener) = listeners.get_mut(address) else {
            return;
        };
        listener.services.remove(service);
        if listener.services.is_empty() {
            if let Some(listener) = listeners.remove(address) {
                let _ = listener.shutdown_tx.send(());
                info!("{} listener on {} stopped", listener.protocol, listener.local_addr);
            }
        }
    }

    /// Addresses currently used by `service`.
    pub fn addresses_of(&self, service: &str) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .filter(|(_, l)| l.services.contains(service))
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn local_addr(&self, address: &str) -> Option<SocketAddr> {
        self.listeners.read().get(address).map(|l| l.local_addr)
    }

    pub fn shutdown(&self) {
        let mut listeners = self.listeners.write();
        for (_, listener) in listeners.drain() {
            let _ = listener.shutdown_tx.send(());
        }
    }
}

impl Default for ListenerManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<dyn ConnectionHandler>, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        let conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            debug!("{} connection from {}", handler.protocol(), peer);
                            handler.serve(stream, peer, conn_shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!("Accept error on {}: {}", handler.protocol(), e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// Binds a handler per address of a service and releases the addresses it
/// no longer uses. Returns the addresses bound successfully.
pub fn sync_service(
    manager: &ListenerManager,
    service: &str,
    handlers: Vec<(String, Arc<dyn ConnectionHandler>)>,
) -> Vec<(String, SocketAddr)> {
    for old in manager.addresses_of(service) {
        if !handlers.iter().any(|(address, _)| *address == old) {
            manager.release(&old, service);
        }
    }
    let mut bound = Vec::new();
    for (address, handler) in handlers {
        match manager.bind(&address, service, handler) {
            Ok(local) => bound.push((address, local)),
            Err(e) => warn!("service {}: {}", service, e),
        }
    }
    bound
}

/// Releases every address of a service.
pub fn release_service(manager: &ListenerManager, service: &str) {
    for address in manager.addresses_of(service) {
        manager.release(&address, service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    struct Echo;

    #[async_trait]
    impl ConnectionHandler for Echo {
        fn protocol(&self) -> &'static str {
            "echo"
        }

        async fn serve(&self, mut stream: TcpStream, _peer: SocketAddr, _shutdown: broadcast::Receiver<()>) {
            let _ = stream.write_all(b"hello").await;
        }
    }

    struct Other;

    #[async_trait]
    impl ConnectionHandler for Other {
        fn protocol(&self) -> &'static str {
            "other"
        }

        async fn serve(&self, _stream: TcpStream, _peer: SocketAddr, _shutdown: broadcast::Receiver<()>) {}
    }

    #[tokio::test]
    async fn test_shared_listener_released_by_last_service() {
        let manager = ListenerManager::new();
        let addr = manager.bind("127.0.0.1:0", "a", Arc::new(Echo)).unwrap();
        manager.bind("127.0.0.1:0", "b", Arc::new(Echo)).unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut stream, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        manager.release("127.0.0.1:0", "a");
        assert!(manager.local_addr("127.0.0.1:0").is_some());
        manager.release("127.0.0.1:0", "b");
        assert!(manager.local_addr("127.0.0.1:0").is_none());
    }

    #[tokio::test]
    async fn test_protocol_conflict() {
        let manager = ListenerManager::new();
        manager.bind("127.0.0.1:0", "a", Arc::new(Echo)).unwrap();
        let err = manager.bind("127.0.0.1:0", "b", Arc::new(Other)).unwrap_err();
        assert!(matches!(err, ListenerError::ProtocolConflict { .. }));
    }

    #[tokio::test]
    async fn test_sync_service_moves_address() {
        let manager = ListenerManager::new();
        let handler: Arc<dyn ConnectionHandler> = Arc::new(Echo);
        let bound = sync_service(&manager, "svc", vec![("127.0.0.1:0".to_string(), handler)]);
        assert_eq!(bound.len(), 1);
        assert_eq!(manager.addresses_of("svc"), vec!["127.0.0.1:0".to_string()]);
        sync_service(&manager, "svc", Vec::new());
        assert!(manager.addresses_of("svc").is_empty());

        let echo: Arc<dyn ConnectionHandler> = Arc::new(Echo);
        sync_service(&manager, "svc", vec![("127.0.0.1:0".to_string(), echo)]);
        release_service(&manager, "svc");
        assert!(manager.local_addr("127.0.0.1:0").is_none());
    }
}
