//! SMTP listener (RFC 5321).
//!
//! A session walks `greet -> [auth] -> MAIL -> RCPT+ -> DATA`. Command
//! handling is kept apart from socket IO so it can be driven directly.

use super::message::Message;
use super::service::MailService;
use crate::runtime::listeners::ConnectionHandler;
use async_trait::async_trait;
use base64::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info};

const HOSTNAME: &str = "mokapi";
const READ_TIMEOUT: Duration = Duration::from_secs(300);
/// Longest accepted line including CRLF (RFC 5321 4.5.3.1.6).
const MAX_LINE: usize = 1000;
/// Largest accepted message, advertised as SIZE.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// What the connection loop does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(String),
    /// Reply, then read the message until `.`.
    StartData(String),
    /// Reply, then close.
    Close(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthStep {
    Plain,
    LoginUser,
    LoginPassword(String),
}

pub struct Session {
    service: Arc<MailService>,
    greeted: bool,
    authenticated: Option<String>,
    auth: Option<AuthStep>,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Session {
    pub fn new(service: Arc<MailService>) -> Self {
        Self {
            service,
            greeted: false,
            authenticated: None,
            auth: None,
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub fn greeting() -> String {
        format!("220 {HOSTNAME} ESMTP Mokapi")
    }

    fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    /// Handles one command line without its line terminator.
    pub fn command(&mut self, line: &str) -> Action {
        if let Some(step) = self.auth.take() {
            return Action::Reply(self.auth_step(step, line.trim()));
        }

        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.trim()),
            None => (line.trim().to_ascii_uppercase(), ""),
        };
        debug!("smtp command {}", verb);

        let reply = match verb.as_str() {
            "HELO" => {
                self.greeted = true;
                self.reset();
                format!("250 {HOSTNAME} Hello {arg}")
            }
            "EHLO" => {
                self.greeted = true;
                self.reset();
                [
                    format!("250-{HOSTNAME} Hello {arg}"),
                    "250-8BITMIME".to_string(),
                    "250-ENHANCEDSTATUSCODES".to_string(),
                    "250-PIPELINING".to_string(),
                    format!("250-SIZE {MAX_MESSAGE_SIZE}"),
                    "250 AUTH PLAIN LOGIN".to_string(),
                ]
                .join("\r\n")
            }
            "AUTH" => self.auth(arg),
            "MAIL" => self.mail(arg),
            "RCPT" => self.rcpt(arg),
            "DATA" => {
                if self.recipients.is_empty() {
                    "503 5.5.1 Error: need RCPT command".to_string()
                } else {
                    return Action::StartData("354 End data with <CR><LF>.<CR><LF>".to_string());
                }
            }
            "RSET" => {
                self.reset();
                "250 2.0.0 Ok".to_string()
            }
            "NOOP" => "250 2.0.0 Ok".to_string(),
            "VRFY" => "252 2.5.0 Cannot VRFY user".to_string(),
            "STARTTLS" => "454 4.7.0 TLS not available".to_string(),
            "QUIT" => return Action::Close("221 2.0.0 Bye".to_string()),
            _ => "500 5.5.2 Error: command not recognized".to_string(),
        };
        Action::Reply(reply)
    }

    fn auth(&mut self, arg: &str) -> String {
        if self.authenticated.is_some() {
            return "503 5.5.1 Error: already authenticated".to_string();
        }
        let (mechanism, initial) = match arg.split_once(' ') {
            Some((m, i)) => (m.to_ascii_uppercase(), Some(i.trim())),
            None => (arg.to_ascii_uppercase(), None),
        };
        match (mechanism.as_str(), initial) {
            ("PLAIN", Some(response)) => self.auth_step(AuthStep::Plain, response),
            ("PLAIN", None) => {
                self.auth = Some(AuthStep::Plain);
                "334 ".to_string()
            }
            ("LOGIN", Some(user)) => self.auth_step(AuthStep::LoginUser, user),
            ("LOGIN", None) => {
                self.auth = Some(AuthStep::LoginUser);
                // "Username:"
                "334 VXNlcm5hbWU6".to_string()
            }
            _ => "504 5.5.4 Unrecognized authentication type".to_string(),
        }
    }

    fn auth_step(&mut self, step: AuthStep, response: &str) -> String {
        if response == "*" {
            return "501 5.0.0 Authentication cancelled".to_string();
        }
        let Some(decoded) = decode_base64(response) else {
            return "501 5.5.2 Cannot decode response".to_string();
        };
        let (user, password) = match step {
            AuthStep::Plain => {
                let mut fields = decoded.split('\0');
                let _authz = fields.next();
                let user = fields.next().unwrap_or_default().to_string();
                let password = fields.next().unwrap_or_default().to_string();
                (user, password)
            }
            AuthStep::LoginUser => {
                self.auth = Some(AuthStep::LoginPassword(decoded));
                // "Password:"
                return "334 UGFzc3dvcmQ6".to_string();
            }
            AuthStep::LoginPassword(user) => (user, decoded),
        };

        match self.service.login(&user, &password) {
            Some(mailbox) => {
                self.authenticated = Some(mailbox.name.clone());
                "235 2.7.0 Authentication successful".to_string()
            }
            None => {
                self.service.track_error("AUTH");
                "535 5.7.8 Authentication credentials invalid".to_string()
            }
        }
    }

    fn mail(&mut self, arg: &str) -> String {
        if !self.greeted {
            return "503 5.5.1 Error: send HELO/EHLO first".to_string();
        }
        if self.sender.is_some() {
            return "503 5.5.1 Error: nested MAIL command".to_string();
        }
        let Some(address) = path_argument(arg, "FROM:") else {
            return "501 5.5.4 Syntax: MAIL FROM:<address>".to_string();
        };
        if let Err(rejection) = self.service.check_sender(&address, self.authenticated.as_deref()) {
            info!("smtp sender {} rejected: {}", address, rejection);
            self.service.track_error("MAIL");
            return rejection.to_string();
        }
        self.sender = Some(address);
        "250 2.1.0 Ok".to_string()
    }

    fn rcpt(&mut self, arg: &str) -> String {
        if self.sender.is_none() {
            return "503 5.5.1 Error: need MAIL command".to_string();
        }
        let Some(address) = path_argument(arg, "TO:") else {
            return "501 5.5.4 Syntax: RCPT TO:<address>".to_string();
        };
        if let Err(rejection) = self.service.check_recipient(&address, self.recipients.len()) {
            info!("smtp recipient {} rejected: {}", address, rejection);
            self.service.track_error("RCPT");
            return rejection.to_string();
        }
        self.recipients.push(address);
        "250 2.1.5 Ok".to_string()
    }

    /// Rejects a message larger than `MAX_MESSAGE_SIZE` and resets the
    /// transaction.
    pub fn data_too_large(&mut self) -> String {
        self.reset();
        self.service.track_error("DATA");
        "552 5.3.4 Message size exceeds fixed maximum message size".to_string()
    }

    /// Accepts the message read after DATA. The transaction is reset either
    /// way.
    pub fn data(&mut self, raw: Vec<u8>) -> String {
        let sender = self.sender.take().unwrap_or_default();
        let recipients = std::mem::take(&mut self.recipients);
        let message = Message::parse(raw);
        match self.service.deliver(&sender, &recipients, message) {
            Ok(()) => "250 2.0.0 Ok: queued".to_string(),
            Err(rejection) => {
                info!("smtp message from {} rejected: {}", sender, rejection);
                self.service.track_error("DATA");
                rejection.to_string()
            }
        }
    }
}

/// Extracts the address of `FROM:<a@b> SIZE=10`.
fn path_argument(arg: &str, prefix: &str) -> Option<String> {
    let head = arg.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = arg[prefix.len()..].trim_start();
    let address = match rest.strip_prefix('<') {
        Some(inner) => &inner[..inner.find('>')?],
        None => rest.split_whitespace().next().unwrap_or_default(),
    };
    Some(address.trim().to_string())
}

fn decode_base64(s: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
    String::from_utf8(bytes).ok()
}

/// Serves SMTP for one mail service.
pub struct SmtpHandler {
    service: Arc<MailService>,
}

impl SmtpHandler {
    pub fn new(service: Arc<MailService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ConnectionHandler for SmtpHandler {
    fn protocol(&self) -> &'static str {
        "smtp"
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut session = Session::new(Arc::clone(&self.service));

        if writer
            .write_all(format!("{}\r\n", Session::greeting()).as_bytes())
            .await
            .is_err()
        {
            return;
        }

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                r = tokio::time::timeout(READ_TIMEOUT, read_line(&mut reader, &mut line)) => r,
                _ = shutdown.recv() => break,
            };
            match read {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Err(e)) => {
                    debug!("smtp connection {} read error: {}", peer, e);
                    break;
                }
                Ok(Ok(_)) => {}
            }
            if !line.ends_with(b"\n") && line.len() >= MAX_LINE {
                debug!("smtp connection {} sent an overlong line", peer);
                let _ = writer.write_all(b"500 5.5.2 Error: line too long\r\n").await;
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);

            let (reply, close) = match session.command(text) {
                Action::Reply(r) => (r, false),
                Action::Close(r) => (r, true),
                Action::StartData(r) => {
                    if writer.write_all(format!("{r}\r\n").as_bytes()).await.is_err() {
                        break;
                    }
                    match read_data(&mut reader, MAX_MESSAGE_SIZE).await {
                        Some(Data::Message(raw)) => (session.data(raw), false),
                        Some(Data::TooLarge) => (session.data_too_large(), false),
                        None => break,
                    }
                }
            };
            if writer.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() || close {
                break;
            }
        }
        debug!("smtp connection {} closed", peer);
    }
}

/// Reads one line of at most `MAX_LINE` bytes.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
) -> std::io::Result<usize> {
    (&mut *reader).take(MAX_LINE as u64).read_until(b'\n', line).await
}

/// Message body read after DATA.
#[derive(Debug, PartialEq, Eq)]
enum Data {
    Message(Vec<u8>),
    /// The body exceeded the size limit; it was read to the end and dropped.
    TooLarge,
}

/// Reads the message body up to the terminating `.` line, undoing dot
/// stuffing. Overlong lines are read in chunks.
async fn read_data<R: AsyncBufRead + Unpin>(reader: &mut R, max_size: usize) -> Option<Data> {
    let mut data = Vec::new();
    let mut line = Vec::new();
    let mut too_large = false;
    let mut line_start = true;
    loop {
        line.clear();
        let n = tokio::time::timeout(READ_TIMEOUT, read_line(reader, &mut line))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            return None;
        }
        if line_start && (line == b".\r\n" || line == b".\n") {
            return Some(if too_large { Data::TooLarge } else { Data::Message(data) });
        }
        let content = match line_start {
            true => line.strip_prefix(b".").unwrap_or(&line),
            false => &line[..],
        };
        if !too_large {
            if data.len() + content.len() > max_size {
                too_large = true;
                data = Vec::new();
            } else {
                data.extend_from_slice(content);
            }
        }
        line_start = line.ends_with(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventManager, Traits};
    use crate::monitor::Monitor;
    use crate::spec::mail::Config;

    fn session(yaml: &str) -> (Session, Arc<MailService>) {
        let events = Arc::new(EventManager::new());
        events.set_store(10, Traits::new().with_namespace("mail").with_name("m"));
        let svc = MailService::new("m", Arc::new(Monitor::new()), events);
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        svc.update(Arc::new(config));
        (Session::new(Arc::clone(&svc)), svc)
    }

    fn reply(action: Action) -> String {
        match action {
            Action::Reply(r) | Action::StartData(r) | Action::Close(r) => r,
        }
    }

    #[test]
    fn test_sender_allow_rule() {
        let yaml = "mail: '1.0'\ninfo: {title: m}\nrules:\n  - sender: .*@foo.bar\n    action: allow\n";
        let (mut s, _) = session(yaml);
        reply(s.command("EHLO client"));
        assert_eq!(reply(s.command("MAIL FROM:<alice@foo.bar>")), "250 2.1.0 Ok");

        let (mut s, svc) = session(yaml);
        reply(s.command("HELO client"));
        assert_eq!(
            reply(s.command("MAIL FROM:<alice@bar.baz>")),
            "550 5.1.0 sender alice@bar.baz does not match allow rule: .*@foo.bar"
        );
        assert_eq!(
            svc.monitor().mail.requests_errors_total.value(&["m", "MAIL"]),
            Some(1.0)
        );
    }

    #[test]
    fn test_full_transaction() {
        let (mut s, svc) = session("mail: '1.0'\ninfo: {title: m}\n");
        assert!(reply(s.command("EHLO x")).ends_with("250 AUTH PLAIN LOGIN"));
        assert_eq!(reply(s.command("RCPT TO:<bob@mokapi.io>")), "503 5.5.1 Error: need MAIL command");
        reply(s.command("MAIL FROM:<alice@foo.bar> SIZE=100"));
        assert_eq!(reply(s.command("rcpt to:<bob@mokapi.io>")), "250 2.1.5 Ok");
        assert!(matches!(s.command("DATA"), Action::StartData(_)));
        assert_eq!(s.data(b"Subject: hi\r\n\r\nhello\r\n".to_vec()), "250 2.0.0 Ok: queued");
        assert_eq!(svc.mailbox("bob@mokapi.io").unwrap().snapshot("INBOX").unwrap().len(), 1);
        assert_eq!(s.command("QUIT"), Action::Close("221 2.0.0 Bye".into()));
    }

    #[test]
    fn test_auth_login_and_plain() {
        let yaml = "mail: '1.0'\ninfo: {title: m}\nmailboxes:\n  - name: alice@mokapi.io\n    username: alice\n    password: secret\n";
        let (mut s, _) = session(yaml);
        reply(s.command("EHLO x"));
        assert_eq!(reply(s.command("MAIL FROM:<alice@mokapi.io>")), "530 5.7.0 Authentication required");
        assert_eq!(reply(s.command("AUTH LOGIN")), "334 VXNlcm5hbWU6");
        assert_eq!(reply(s.command("YWxpY2U=")), "334 UGFzc3dvcmQ6");
        assert_eq!(reply(s.command("c2VjcmV0")), "235 2.7.0 Authentication successful");
        assert_eq!(reply(s.command("MAIL FROM:<alice@mokapi.io>")), "250 2.1.0 Ok");

        let (mut s, _) = session(yaml);
        // "\0alice\0wrong"
        assert_eq!(
            reply(s.command("AUTH PLAIN AGFsaWNlAHdyb25n")),
            "535 5.7.8 Authentication credentials invalid"
        );
    }

    #[test]
    fn test_path_argument() {
        assert_eq!(path_argument("FROM:<a@b>", "FROM:"), Some("a@b".into()));
        assert_eq!(path_argument("from: <a@b> BODY=8BITMIME", "FROM:"), Some("a@b".into()));
        assert_eq!(path_argument("FROM:<>", "FROM:"), Some("".into()));
        assert_eq!(path_argument("TO:<a@b>", "FROM:"), None);
    }

    #[tokio::test]
    async fn test_read_data_unstuffs_dots() {
        let input: &[u8] = b"line\r\n..dot\r\n.\r\nnext";
        let mut reader = BufReader::new(input);
        let data = read_data(&mut reader, 100).await.unwrap();
        assert_eq!(data, Data::Message(b"line\r\n.dot\r\n".to_vec()));
    }

    #[tokio::test]
    async fn test_read_data_size_limit() {
        let input: &[u8] = b"0123456789\r\nabc\r\n.\r\nQUIT\r\n";
        let mut reader = BufReader::new(input);
        assert_eq!(read_data(&mut reader, 8).await, Some(Data::TooLarge));
        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest, "QUIT\r\n");
    }

    #[tokio::test]
    async fn test_read_data_long_lines_are_chunked() {
        let mut input = vec![b'x'; MAX_LINE + 10];
        input.extend_from_slice(b"\r\n.\r\n");
        let mut reader = BufReader::new(&input[..]);
        match read_data(&mut reader, MAX_MESSAGE_SIZE).await {
            Some(Data::Message(data)) => assert_eq!(data.len(), MAX_LINE + 12),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_line_is_capped() {
        let input = vec![b'a'; MAX_LINE * 2];
        let mut reader = BufReader::new(&input[..]);
        let mut line = Vec::new();
        assert_eq!(read_line(&mut reader, &mut line).await.unwrap(), MAX_LINE);
        assert!(!line.ends_with(b"\n"));
    }

    #[test]
    fn test_data_too_large_resets_transaction() {
        let (mut s, svc) = session("mail: '1.0'\ninfo: {title: m}\n");
        reply(s.command("EHLO x"));
        reply(s.command("MAIL FROM:<alice@foo.bar>"));
        reply(s.command("RCPT TO:<bob@mokapi.io>"));
        assert_eq!(
            s.data_too_large(),
            "552 5.3.4 Message size exceeds fixed maximum message size"
        );
        assert!(svc.mailbox("bob@mokapi.io").is_none());
        assert_eq!(reply(s.command("RCPT TO:<bob@mokapi.io>")), "503 5.5.1 Error: need MAIL command");
    }
}
