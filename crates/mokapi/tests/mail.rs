//! SMTP and IMAP sessions over real sockets.

use mokapi::dynamic::{decode, Action, Config};
use mokapi::mail::mailbox::{FlagMode, INBOX};
use mokapi::mail::sequence::SequenceSet;
use mokapi::mail::Message;
use mokapi::runtime::{App, StoreSizes};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const MAIL: &str = r#"
mail: '1.0'
info:
  title: mail
servers:
  - url: smtp://127.0.0.1:0
  - url: imap://localhost:0
mailboxes:
  - name: alice@mokapi.io
    username: alice
    password: secret
"#;

const RELAY: &str = r#"
mail: '1.0'
info:
  title: mail
servers:
  - url: smtp://127.0.0.1:0
rules:
  - sender: .*@foo.bar
    action: allow
"#;

fn app_with(raw: &str) -> Arc<App> {
    let app = App::new(StoreSizes::default());
    let mut config = Config::new("test", "file:///mail.yaml", raw.as_bytes().to_vec());
    config.data = decode(raw.as_bytes()).unwrap();
    app.apply(config, Action::Create);
    app
}

fn app() -> Arc<App> {
    app_with(MAIL)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed");
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
    }

    /// Sends an SMTP command and returns the final reply line.
    async fn smtp(&mut self, line: &str) -> String {
        self.send(line).await;
        loop {
            let reply = self.line().await;
            if reply.as_bytes().get(3) != Some(&b'-') {
                return reply;
            }
        }
    }

    /// Sends a tagged IMAP command and returns every line up to the tagged
    /// completion.
    async fn imap(&mut self, tag: &str, command: &str) -> Vec<String> {
        self.send(&format!("{tag} {command}")).await;
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                return lines;
            }
        }
    }
}

#[tokio::test]
async fn test_smtp_sender_allow_rule() {
    let app = app_with(RELAY);
    let addr = app.listeners.local_addr("127.0.0.1:0").unwrap();

    let mut client = Client::connect(addr).await;
    assert!(client.line().await.starts_with("220 "));
    assert!(client.smtp("EHLO client").await.starts_with("250 "));
    assert_eq!(client.smtp("MAIL FROM:<alice@foo.bar>").await, "250 2.1.0 Ok");
    assert_eq!(client.smtp("RCPT TO:<alice@mokapi.io>").await, "250 2.1.5 Ok");
    assert!(client.smtp("DATA").await.starts_with("354 "));
    client.send("Subject: hello").await;
    client.send("").await;
    client.send("hi there").await;
    assert_eq!(client.smtp(".").await, "250 2.0.0 Ok: queued");
    assert_eq!(client.smtp("QUIT").await, "221 2.0.0 Bye");

    let mut client = Client::connect(addr).await;
    client.line().await;
    client.smtp("HELO client").await;
    assert_eq!(
        client.smtp("MAIL FROM:<alice@bar.baz>").await,
        "550 5.1.0 sender alice@bar.baz does not match allow rule: .*@foo.bar"
    );

    let service = app.mail.service("mail").unwrap();
    let inbox = service.mailbox("alice@mokapi.io").unwrap().snapshot(INBOX).unwrap();
    assert_eq!(inbox.len(), 1);
    app.shutdown();
}

#[tokio::test]
async fn test_smtp_unknown_sender_rejected() {
    let app = app();
    let addr = app.listeners.local_addr("127.0.0.1:0").unwrap();

    let mut client = Client::connect(addr).await;
    client.line().await;
    client.smtp("EHLO client").await;
    assert_eq!(
        client.smtp("MAIL FROM:<mallory@evil.io>").await,
        "550 5.1.1 Address rejected: mallory@evil.io"
    );
    assert_eq!(client.smtp("QUIT").await, "221 2.0.0 Bye");
    app.shutdown();
}

#[tokio::test]
async fn test_imap_uid_expunge_single_message() {
    let app = app();
    let addr = app.listeners.local_addr("localhost:0").unwrap();
    let mailbox = app.mail.service("mail").unwrap().mailbox("alice@mokapi.io").unwrap();
    for i in 0..144 {
        let raw = format!("From: bob@foo.bar\r\nSubject: {i}\r\n\r\nhello\r\n");
        mailbox
            .append(INBOX, Arc::new(Message::parse(raw.into_bytes())), None, None)
            .unwrap();
    }
    let old: Vec<u32> = (1..=142).collect();
    mailbox
        .store(INBOX, &SequenceSet::from_values(&old), true, FlagMode::Add, &["\\Deleted".to_string()])
        .unwrap();
    mailbox.expunge(INBOX, None).unwrap();

    let mut client = Client::connect(addr).await;
    assert!(client.line().await.starts_with("* OK"));
    assert!(client.imap("a", "LOGIN alice secret").await.last().unwrap().starts_with("a OK"));
    let select = client.imap("b", "SELECT INBOX").await;
    assert!(select.contains(&"* 2 EXISTS".to_string()));
    client.imap("c", "UID STORE 143:144 +FLAGS.SILENT (\\Deleted)").await;

    let out = client.imap("d", "UID EXPUNGE 143").await;
    assert_eq!(out, vec!["* 1 EXPUNGE".to_string(), "d OK EXPUNGE completed".to_string()]);

    let left = mailbox.snapshot(INBOX).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].uid, 144);

    assert_eq!(
        client.imap("e", "UID FETCH 1:* (UID)").await,
        vec!["* 1 FETCH (UID 144)".to_string(), "e OK FETCH completed".to_string()]
    );
    assert_eq!(
        client.imap("f", "FETCH 1:* (FLAGS)").await,
        vec!["* 1 FETCH (FLAGS (\\Deleted))".to_string(), "f OK FETCH completed".to_string()]
    );
    assert_eq!(client.imap("g", "UID FETCH 143 (UID)").await, vec!["g OK FETCH completed".to_string()]);
    assert_eq!(client.imap("h", "FETCH 2 (UID)").await, vec!["h OK FETCH completed".to_string()]);
    client.imap("i", "LOGOUT").await;
    app.shutdown();
}

#[tokio::test]
async fn test_imap_rename_inbox() {
    let app = app();
    let addr = app.listeners.local_addr("localhost:0").unwrap();
    let mailbox = app.mail.service("mail").unwrap().mailbox("alice@mokapi.io").unwrap();
    for subject in ["one", "two"] {
        let raw = format!("From: bob@foo.bar\r\nSubject: {subject}\r\n\r\nhello\r\n");
        mailbox
            .append(INBOX, Arc::new(Message::parse(raw.into_bytes())), None, None)
            .unwrap();
    }

    let mut client = Client::connect(addr).await;
    client.line().await;
    client.imap("a", "LOGIN alice secret").await;
    assert_eq!(client.imap("b", "RENAME INBOX old").await, vec!["b OK RENAME completed".to_string()]);

    let inbox = client.imap("c", "STATUS INBOX (MESSAGES)").await;
    assert!(inbox[0].contains("MESSAGES 0"), "{inbox:?}");
    let old = client.imap("d", "STATUS old (MESSAGES)").await;
    assert!(old[0].contains("MESSAGES 2"), "{old:?}");
    app.shutdown();
}
