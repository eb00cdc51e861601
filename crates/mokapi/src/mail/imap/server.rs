//! IMAP connection loop: literal continuations, AUTHENTICATE and IDLE.

use super::parser::{self, trailing_literal};
use super::session::{render_update, Next, Session};
use crate::mail::mailbox::Update;
use crate::mail::service::MailService;
use crate::runtime::listeners::ConnectionHandler;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Clients must send something at least every 30 minutes, IDLE included.
const READ_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_LITERAL: usize = 50 * 1024 * 1024;

pub struct ImapHandler {
    service: Arc<MailService>,
}

impl ImapHandler {
    pub fn new(service: Arc<MailService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("connection closed")]
    Closed,
    #[error("read timeout")]
    Timeout,
    #[error("literal of {0} bytes exceeds limit")]
    LiteralTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one command including its literals, sending a continuation for
/// every synchronizing literal.
async fn read_command<R, W>(reader: &mut R, writer: &mut W) -> Result<Vec<u8>, ReadError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut command = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = tokio::time::timeout(READ_TIMEOUT, reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| ReadError::Timeout)??;
        if n == 0 {
            return Err(ReadError::Closed);
        }
        command.extend_from_slice(&line);
        let Some((len, non_sync)) = trailing_literal(&line) else {
            return Ok(command);
        };
        if len > MAX_LITERAL {
            return Err(ReadError::LiteralTooLarge(len));
        }
        if !non_sync {
            writer.write_all(b"+ Ready for literal data\r\n").await?;
        }
        let mut literal = vec![0u8; len];
        reader.read_exact(&mut literal).await?;
        command.extend_from_slice(&literal);
    }
}

enum IdleEnd {
    Done,
    Closed,
}

async fn idle<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut updates: Option<mpsc::Receiver<Update>>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<IdleEnd, ReadError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        let next_update = async {
            match updates.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            read = tokio::time::timeout(READ_TIMEOUT, reader.read_until(b'\n', &mut line)) => {
                let n = read.map_err(|_| ReadError::Timeout)??;
                if n == 0 {
                    return Ok(IdleEnd::Closed);
                }
                let done = String::from_utf8_lossy(&line).trim().eq_ignore_ascii_case("DONE");
                line.clear();
                if done {
                    return Ok(IdleEnd::Done);
                }
            }
            update = next_update => match update {
                Some(update) => writer.write_all(&render_update(&update)).await?,
                None => updates = None,
            },
            _ = shutdown.recv() => {
                writer.write_all(b"* BYE server shutting down\r\n").await?;
                return Ok(IdleEnd::Closed);
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for ImapHandler {
    fn protocol(&self) -> &'static str {
        "imap"
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut session = Session::new(Arc::clone(&self.service));

        if writer.write_all(Session::greeting().as_bytes()).await.is_err() {
            return;
        }

        loop {
            let command = tokio::select! {
                c = read_command(&mut reader, &mut writer) => c,
                _ = shutdown.recv() => {
                    let _ = writer.write_all(b"* BYE server shutting down\r\n").await;
                    break;
                }
            };
            let command = match command {
                Ok(c) => c,
                Err(ReadError::Closed) => break,
                Err(e) => {
                    debug!("imap connection {} read error: {}", peer, e);
                    let _ = writer.write_all(format!("* BYE {e}\r\n").as_bytes()).await;
                    break;
                }
            };

            let response = match parser::parse(&command) {
                Ok(request) => session.handle(request),
                Err((tag, e)) => {
                    if writer.write_all(&session.syntax_error(tag, &e)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            if writer.write_all(&response.data).await.is_err() {
                break;
            }

            match response.next {
                Next::Continue => {}
                Next::Logout => break,
                Next::AuthContinue { tag } => {
                    if writer.write_all(b"+ \r\n").await.is_err() {
                        break;
                    }
                    let mut line = Vec::new();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(n) if n > 0 => {}
                        _ => break,
                    }
                    let reply = session.authenticate_plain(&tag, &String::from_utf8_lossy(&line));
                    if writer.write_all(&reply).await.is_err() {
                        break;
                    }
                }
                Next::Idle { tag } => {
                    if writer.write_all(b"+ idling\r\n").await.is_err() {
                        break;
                    }
                    let watched = session.watched();
                    let subscription = watched.as_ref().map(|(mailbox, folder)| mailbox.watch(folder));
                    let (watch_id, updates) = match subscription {
                        Some((id, rx)) => (Some(id), Some(rx)),
                        None => (None, None),
                    };
                    let end = idle(&mut reader, &mut writer, updates, &mut shutdown).await;
                    if let (Some((mailbox, _)), Some(id)) = (&watched, watch_id) {
                        mailbox.unwatch(id);
                    }
                    match end {
                        Ok(IdleEnd::Done) => {
                            if writer.write_all(&Session::idle_done(&tag)).await.is_err() {
                                break;
                            }
                        }
                        Ok(IdleEnd::Closed) => break,
                        Err(e) => {
                            debug!("imap connection {} idle error: {}", peer, e);
                            break;
                        }
                    }
                }
            }
        }
        debug!("imap connection {} closed", peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_command_with_literal() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut reader = BufReader::new(server_read);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"a1 LOGIN {5}\r\nalice secret\r\n")
            .await
            .unwrap();
        let command = read_command(&mut reader, &mut server_write).await.unwrap();
        assert_eq!(command, b"a1 LOGIN {5}\r\nalice secret\r\n".to_vec());

        let mut continuation = [0u8; 26];
        client_read.read_exact(&mut continuation).await.unwrap();
        assert_eq!(&continuation, b"+ Ready for literal data\r\n");
    }

    #[tokio::test]
    async fn test_read_command_non_sync_literal() {
        let mut reader = BufReader::new(&b"a APPEND INBOX {4+}\r\ntest\r\n"[..]);
        let mut sink = Vec::new();
        let command = read_command(&mut reader, &mut sink).await.unwrap();
        assert_eq!(command, b"a APPEND INBOX {4+}\r\ntest\r\n".to_vec());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_read_command_closed() {
        let mut reader = BufReader::new(&b""[..]);
        let mut sink = Vec::new();
        assert!(matches!(
            read_command(&mut reader, &mut sink).await,
            Err(ReadError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_idle_forwards_updates_until_done() {
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, mut shutdown) = broadcast::channel(1);
        tx.send(Update::Exists(2)).await.unwrap();
        drop(tx);

        let (client, server) = tokio::io::duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut reader = BufReader::new(server_read);
        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);

        let task = tokio::spawn(async move {
            let end = idle(&mut reader, &mut server_write, Some(rx), &mut shutdown).await;
            matches!(end, Ok(IdleEnd::Done))
        });

        let mut line = String::new();
        client_read.read_line(&mut line).await.unwrap();
        assert_eq!(line, "* 2 EXISTS\r\n");
        client_write.write_all(b"DONE\r\n").await.unwrap();
        assert!(task.await.unwrap());
    }
}
