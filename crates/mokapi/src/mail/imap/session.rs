//! IMAP session state: not authenticated, authenticated, selected.

use super::fetch::{self, flag_list, FetchItem};
use super::parser::{Command, ImapError, Request};
use super::search::Context;
use crate::mail::error::MailError;
use crate::mail::mailbox::{FlagMode, Mailbox, Update, DELIMITER, PERMANENT_FLAGS, SEEN};
use crate::mail::message::Message;
use crate::mail::sequence::SequenceSet;
use crate::mail::service::MailService;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;

pub const CAPABILITIES: &str = "IMAP4rev1 AUTH=PLAIN SASL-IR LITERAL+ IDLE UIDPLUS MOVE UNSELECT LIST-EXTENDED ID";

/// What the connection does after writing a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Continue,
    Logout,
    /// Enter IDLE; the tagged completion is sent after DONE.
    Idle { tag: String },
    /// Send a continuation and pass the next line to
    /// [`Session::authenticate_plain`].
    AuthContinue { tag: String },
}

#[derive(Debug)]
pub struct Response {
    pub data: Vec<u8>,
    pub next: Next,
}

enum Failure {
    No(String),
    Bad(String),
}

type Outcome = Result<String, Failure>;

fn mail_error(e: MailError) -> Failure {
    match e {
        MailError::NoSuchFolder(_) => Failure::No(format!("[NONEXISTENT] {e}")),
        MailError::FolderExists(_) => Failure::No(format!("[ALREADYEXISTS] {e}")),
        other => Failure::No(other.to_string()),
    }
}

/// Target folder errors ask the client to create the folder first.
fn target_error(e: MailError) -> Failure {
    match e {
        MailError::NoSuchFolder(_) => Failure::No(format!("[TRYCREATE] {e}")),
        other => mail_error(other),
    }
}

struct Selected {
    folder: String,
    read_only: bool,
}

pub struct Session {
    service: Arc<MailService>,
    mailbox: Option<Arc<Mailbox>>,
    selected: Option<Selected>,
}

impl Session {
    pub fn new(service: Arc<MailService>) -> Self {
        Self {
            service,
            mailbox: None,
            selected: None,
        }
    }

    pub fn greeting() -> String {
        format!("* OK [CAPABILITY {CAPABILITIES}] Mokapi IMAP ready\r\n")
    }

    /// Mailbox and folder an IDLE command should watch.
    pub fn watched(&self) -> Option<(Arc<Mailbox>, String)> {
        let mailbox = self.mailbox.as_ref()?;
        let selected = self.selected.as_ref()?;
        Some((Arc::clone(mailbox), selected.folder.clone()))
    }

    pub fn syntax_error(&self, tag: Option<String>, error: &ImapError) -> Vec<u8> {
        self.service.track_error("BAD");
        format!("{} BAD {}\r\n", tag.as_deref().unwrap_or("*"), error).into_bytes()
    }

    pub fn handle(&mut self, request: Request) -> Response {
        let Request { tag, command } = request;
        let name = command.name();
        let next = match &command {
            Command::Logout => Next::Logout,
            Command::Idle => Next::Idle { tag: tag.clone() },
            Command::Authenticate { initial: None, .. } if self.mailbox.is_none() => {
                Next::AuthContinue { tag: tag.clone() }
            }
            _ => Next::Continue,
        };

        let mut data = Vec::new();
        if let Next::Idle { .. } | Next::AuthContinue { .. } = next {
            if let Err(failure) = self.precheck(&command) {
                self.complete(&mut data, &tag, name, Err(failure));
                return Response {
                    data,
                    next: Next::Continue,
                };
            }
            return Response { data, next };
        }

        let outcome = self.execute(command, &mut data);
        self.complete(&mut data, &tag, name, outcome);
        Response { data, next }
    }

    /// Completes an AUTHENTICATE PLAIN exchange with the client's response
    /// line.
    pub fn authenticate_plain(&mut self, tag: &str, line: &str) -> Vec<u8> {
        let mut data = Vec::new();
        let outcome = if line.trim() == "*" {
            Err(Failure::Bad("authentication cancelled".to_string()))
        } else {
            self.login_plain(line.trim())
        };
        self.complete(&mut data, tag, "AUTHENTICATE", outcome);
        data
    }

    pub fn idle_done(tag: &str) -> Vec<u8> {
        format!("{tag} OK IDLE terminated\r\n").into_bytes()
    }

    fn complete(&self, data: &mut Vec<u8>, tag: &str, name: &str, outcome: Outcome) {
        let line = match outcome {
            Ok(text) => format!("{tag} OK {text}\r\n"),
            Err(Failure::No(text)) => {
                self.service.track_error(name);
                format!("{tag} NO {text}\r\n")
            }
            Err(Failure::Bad(text)) => {
                self.service.track_error(name);
                format!("{tag} BAD {text}\r\n")
            }
        };
        data.extend_from_slice(line.as_bytes());
    }

    fn precheck(&self, command: &Command) -> Result<(), Failure> {
        match command {
            Command::Idle => self.authenticated().map(|_| ()),
            Command::Authenticate { mechanism, .. } if mechanism != "PLAIN" => {
                Err(Failure::No(format!("unsupported mechanism {mechanism}")))
            }
            _ => Ok(()),
        }
    }

    fn authenticated(&self) -> Result<Arc<Mailbox>, Failure> {
        self.mailbox
            .clone()
            .ok_or_else(|| Failure::Bad("not authenticated".to_string()))
    }

    fn selected(&self) -> Result<(Arc<Mailbox>, String, bool), Failure> {
        let mailbox = self.authenticated()?;
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| Failure::Bad("no mailbox selected".to_string()))?;
        Ok((mailbox, selected.folder.clone(), selected.read_only))
    }

    fn writable(&self) -> Result<(Arc<Mailbox>, String), Failure> {
        let (mailbox, folder, read_only) = self.selected()?;
        if read_only {
            return Err(Failure::No("[READ-ONLY] mailbox is read-only".to_string()));
        }
        Ok((mailbox, folder))
    }

    fn login(&mut self, username: &str, password: &str) -> Outcome {
        if self.mailbox.is_some() {
            return Err(Failure::Bad("already authenticated".to_string()));
        }
        match self.service.login(username, password) {
            Some(mailbox) => {
                debug!("imap login {} to mailbox {}", username, mailbox.name);
                self.mailbox = Some(mailbox);
                Ok(format!("[CAPABILITY {CAPABILITIES}] LOGIN completed"))
            }
            None => Err(Failure::No("[AUTHENTICATIONFAILED] Invalid credentials".to_string())),
        }
    }

    fn login_plain(&mut self, encoded: &str) -> Outcome {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| Failure::Bad("invalid base64".to_string()))?;
        let text = String::from_utf8_lossy(&decoded).into_owned();
        let mut fields = text.split('\0');
        let (_authzid, username, password) = match (fields.next(), fields.next(), fields.next()) {
            (Some(a), Some(u), Some(p)) => (a, u, p),
            _ => return Err(Failure::Bad("invalid PLAIN response".to_string())),
        };
        self.login(username, password)
            .map(|_| "AUTHENTICATE completed".to_string())
    }

    fn execute(&mut self, command: Command, out: &mut Vec<u8>) -> Outcome {
        match command {
            Command::Capability => {
                out.extend_from_slice(format!("* CAPABILITY {CAPABILITIES}\r\n").as_bytes());
                Ok("CAPABILITY completed".to_string())
            }
            Command::Noop | Command::Check => Ok("NOOP completed".to_string()),
            Command::Id => {
                out.extend_from_slice(b"* ID (\"name\" \"Mokapi\")\r\n");
                Ok("ID completed".to_string())
            }
            Command::Logout => {
                out.extend_from_slice(b"* BYE Mokapi IMAP server logging out\r\n");
                Ok("LOGOUT completed".to_string())
            }
            Command::Login { username, password } => self.login(&username, &password),
            Command::Authenticate { mechanism, initial } => {
                if mechanism != "PLAIN" {
                    return Err(Failure::No(format!("unsupported mechanism {mechanism}")));
                }
                match initial.as_deref() {
                    Some("=") => self.login_plain(""),
                    Some(initial) => self.login_plain(initial),
                    None => Err(Failure::Bad("already authenticated".to_string())),
                }
            }
            Command::Select { mailbox, read_only } => self.select(&mailbox, read_only, out),
            Command::Create(name) => {
                self.authenticated()?.create(&name).map_err(mail_error)?;
                Ok("CREATE completed".to_string())
            }
            Command::Delete(name) => {
                self.authenticated()?.delete(&name).map_err(mail_error)?;
                Ok("DELETE completed".to_string())
            }
            Command::Rename { from, to } => {
                self.authenticated()?.rename(&from, &to).map_err(mail_error)?;
                Ok("RENAME completed".to_string())
            }
            Command::Subscribe(name) => {
                self.authenticated()?.subscribe(&name, true).map_err(mail_error)?;
                Ok("SUBSCRIBE completed".to_string())
            }
            Command::Unsubscribe(name) => {
                self.authenticated()?.subscribe(&name, false).map_err(mail_error)?;
                Ok("UNSUBSCRIBE completed".to_string())
            }
            Command::List {
                reference,
                pattern,
                subscribed_only,
                lsub,
            } => {
                let mailbox = self.authenticated()?;
                let word = if lsub { "LSUB" } else { "LIST" };
                if pattern.is_empty() {
                    out.extend_from_slice(format!("* {word} (\\Noselect) \"{DELIMITER}\" \"\"\r\n").as_bytes());
                } else {
                    for entry in mailbox.list(&reference, &pattern, subscribed_only) {
                        out.extend_from_slice(
                            format!("* {word} ({}) \"{DELIMITER}\" ", entry.attributes.join(" ")).as_bytes(),
                        );
                        out.extend(fetch::string(&entry.name));
                        out.extend_from_slice(b"\r\n");
                    }
                }
                Ok(format!("{word} completed"))
            }
            Command::Status { mailbox, items } => {
                let status = self.authenticated()?.status(&mailbox).map_err(mail_error)?;
                let values: Vec<String> = items
                    .iter()
                    .filter_map(|item| {
                        let value = match item.as_str() {
                            "MESSAGES" => status.messages as u64,
                            "RECENT" => status.recent as u64,
                            "UNSEEN" => status.unseen as u64,
                            "UIDNEXT" => u64::from(status.uid_next),
                            "UIDVALIDITY" => u64::from(status.uid_validity),
                            _ => return None,
                        };
                        Some(format!("{item} {value}"))
                    })
                    .collect();
                out.extend_from_slice(b"* STATUS ");
                out.extend(fetch::string(&status.name));
                out.extend_from_slice(format!(" ({})\r\n", values.join(" ")).as_bytes());
                Ok("STATUS completed".to_string())
            }
            Command::Append {
                mailbox,
                flags,
                date,
                message,
            } => {
                let target = self.authenticated()?;
                let message = Arc::new(Message::parse(message));
                let (validity, uid) = target
                    .append(&mailbox, message, flags, date)
                    .map_err(target_error)?;
                Ok(format!("[APPENDUID {validity} {uid}] APPEND completed"))
            }
            Command::Close => {
                let (mailbox, folder, read_only) = self.selected()?;
                if !read_only {
                    mailbox.expunge(&folder, None).map_err(mail_error)?;
                }
                self.selected = None;
                Ok("CLOSE completed".to_string())
            }
            Command::Unselect => {
                self.selected()?;
                self.selected = None;
                Ok("UNSELECT completed".to_string())
            }
            Command::Expunge { uids } => {
                let (mailbox, folder) = self.writable()?;
                let removed = mailbox
                    .expunge(&folder, uids.as_ref().map(|set| (set, true)))
                    .map_err(mail_error)?;
                for (msn, _) in removed {
                    out.extend_from_slice(format!("* {msn} EXPUNGE\r\n").as_bytes());
                }
                Ok("EXPUNGE completed".to_string())
            }
            Command::Search { criteria, uid } => {
                let (mailbox, folder, _) = self.selected()?;
                let mails = mailbox.snapshot(&folder).map_err(mail_error)?;
                let max_uid = mails.last().map(|m| m.uid).unwrap_or(0);
                let mut hits = Vec::new();
                for (i, mail) in mails.iter().enumerate() {
                    let ctx = Context {
                        msn: i + 1,
                        max_msn: mails.len(),
                        max_uid,
                    };
                    if criteria.matches(mail, &ctx) {
                        hits.push(if uid { mail.uid.to_string() } else { (i + 1).to_string() });
                    }
                }
                out.extend_from_slice(b"* SEARCH");
                for hit in hits {
                    out.push(b' ');
                    out.extend_from_slice(hit.as_bytes());
                }
                out.extend_from_slice(b"\r\n");
                Ok("SEARCH completed".to_string())
            }
            Command::Fetch { set, items, uid } => self.fetch(&set, items, uid, out),
            Command::Store {
                set,
                mode,
                silent,
                flags,
                uid,
            } => {
                let (mailbox, folder) = self.writable()?;
                let changed = mailbox
                    .store(&folder, &set, uid, mode, &flags)
                    .map_err(mail_error)?;
                if !silent {
                    for (msn, message_uid, flags) in changed {
                        let uid_item = if uid { format!("UID {message_uid} ") } else { String::new() };
                        out.extend_from_slice(
                            format!("* {msn} FETCH ({uid_item}FLAGS {})\r\n", flag_list(&flags)).as_bytes(),
                        );
                    }
                }
                Ok("STORE completed".to_string())
            }
            Command::Copy { set, mailbox, uid } => {
                let (source, folder, _) = self.selected()?;
                let result = source.copy(&folder, &set, uid, &mailbox).map_err(target_error)?;
                if result.dest.is_empty() {
                    return Ok("COPY completed".to_string());
                }
                Ok(format!(
                    "[COPYUID {} {} {}] COPY completed",
                    result.uid_validity,
                    SequenceSet::compact(&result.source),
                    SequenceSet::compact(&result.dest)
                ))
            }
            Command::Move { set, mailbox, uid } => {
                let (source, folder) = self.writable()?;
                let (result, removed) = source
                    .move_to(&folder, &set, uid, &mailbox)
                    .map_err(target_error)?;
                if !result.dest.is_empty() {
                    out.extend_from_slice(
                        format!(
                            "* OK [COPYUID {} {} {}] Moved\r\n",
                            result.uid_validity,
                            SequenceSet::compact(&result.source),
                            SequenceSet::compact(&result.dest)
                        )
                        .as_bytes(),
                    );
                }
                for msn in removed {
                    out.extend_from_slice(format!("* {msn} EXPUNGE\r\n").as_bytes());
                }
                Ok("MOVE completed".to_string())
            }
            Command::Idle => Ok("IDLE terminated".to_string()),
        }
    }

    fn select(&mut self, name: &str, read_only: bool, out: &mut Vec<u8>) -> Outcome {
        let mailbox = self.authenticated()?;
        self.selected = None;
        let status = mailbox.select(name, read_only).map_err(mail_error)?;

        let flags = PERMANENT_FLAGS.join(" ");
        out.extend_from_slice(format!("* FLAGS ({flags})\r\n").as_bytes());
        if read_only {
            out.extend_from_slice(b"* OK [PERMANENTFLAGS ()] No permanent flags permitted\r\n");
        } else {
            out.extend_from_slice(format!("* OK [PERMANENTFLAGS ({flags} \\*)] Limited\r\n").as_bytes());
        }
        out.extend_from_slice(format!("* {} EXISTS\r\n", status.messages).as_bytes());
        out.extend_from_slice(format!("* {} RECENT\r\n", status.recent).as_bytes());
        if let Some(first) = status.first_unseen {
            out.extend_from_slice(format!("* OK [UNSEEN {first}] Message {first} is first unseen\r\n").as_bytes());
        }
        out.extend_from_slice(format!("* OK [UIDVALIDITY {}] UIDs valid\r\n", status.uid_validity).as_bytes());
        out.extend_from_slice(format!("* OK [UIDNEXT {}] Predicted next UID\r\n", status.uid_next).as_bytes());

        self.selected = Some(Selected {
            folder: status.name,
            read_only,
        });
        if read_only {
            Ok("[READ-ONLY] EXAMINE completed".to_string())
        } else {
            Ok("[READ-WRITE] SELECT completed".to_string())
        }
    }

    fn fetch(&mut self, set: &SequenceSet, mut items: Vec<FetchItem>, uid: bool, out: &mut Vec<u8>) -> Outcome {
        let (mailbox, folder, read_only) = self.selected()?;
        let mut mails = mailbox.messages(&folder, set, uid).map_err(mail_error)?;

        let marks_seen = !read_only && items.iter().any(FetchItem::sets_seen);
        if marks_seen && !items.contains(&FetchItem::Flags) {
            items.push(FetchItem::Flags);
        }
        for (msn, mail) in mails.iter_mut() {
            if marks_seen && !mail.has_flag(SEEN) {
                let changed = mailbox
                    .store(
                        &folder,
                        &SequenceSet::from_values(&[mail.uid]),
                        true,
                        FlagMode::Add,
                        &[SEEN.to_string()],
                    )
                    .map_err(mail_error)?;
                if let Some((_, _, flags)) = changed.into_iter().next() {
                    mail.flags = flags;
                }
            }
            out.extend(fetch::render(*msn, mail, &items, uid));
        }
        Ok("FETCH completed".to_string())
    }
}

/// Untagged response for a change observed while idling.
pub fn render_update(update: &Update) -> Vec<u8> {
    match update {
        Update::Exists(n) => format!("* {n} EXISTS\r\n"),
        Update::Expunge(n) => format!("* {n} EXPUNGE\r\n"),
        Update::Flags { msn, uid, flags } => format!("* {msn} FETCH (UID {uid} FLAGS {})\r\n", flag_list(flags)),
    }
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::mail::imap::parser::parse;
    use crate::mail::mailbox::INBOX;
    use crate::monitor::Monitor;
    use crate::spec::mail::Config;

    fn service() -> (Arc<MailService>, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::new());
        let svc = MailService::new("imap", Arc::clone(&monitor), Arc::new(EventManager::new()));
        let config: Config = serde_yaml::from_str(
            "mail: '1.0'\ninfo: {title: imap}\nmailboxes:\n  - name: alice@mokapi.io\n    username: alice\n    password: secret\n",
        )
        .unwrap();
        svc.update(Arc::new(config));
        (svc, monitor)
    }

    fn run(session: &mut Session, line: &str) -> String {
        let request = parse(line.as_bytes()).unwrap();
        String::from_utf8(session.handle(request).data).unwrap()
    }

    fn logged_in() -> (Session, Arc<Mailbox>, Arc<Monitor>) {
        let (svc, monitor) = service();
        let mailbox = svc.mailbox("alice@mokapi.io").unwrap();
        let mut session = Session::new(svc);
        assert!(run(&mut session, "a1 LOGIN alice secret").starts_with("a1 OK [CAPABILITY"));
        (session, mailbox, monitor)
    }

    fn deliver(mailbox: &Mailbox, subject: &str) {
        let raw = format!("From: bob@foo.bar\r\nSubject: {subject}\r\n\r\nhello\r\n");
        mailbox
            .append(INBOX, Arc::new(Message::parse(raw.into_bytes())), None, None)
            .unwrap();
    }

    #[test]
    fn test_login_required() {
        let (svc, monitor) = service();
        let mut session = Session::new(svc);
        assert_eq!(run(&mut session, "a SELECT INBOX"), "a BAD not authenticated\r\n");
        assert_eq!(
            run(&mut session, "b LOGIN alice wrong"),
            "b NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"
        );
        assert_eq!(monitor.mail.requests_errors_total.value(&["imap", "LOGIN"]), Some(1.0));
    }

    #[test]
    fn test_authenticate_plain() {
        let (svc, _) = service();
        let mut session = Session::new(svc);
        let response = session.handle(parse(b"a AUTHENTICATE PLAIN").unwrap());
        assert_eq!(response.next, Next::AuthContinue { tag: "a".into() });
        // "\0alice\0secret"
        let out = String::from_utf8(session.authenticate_plain("a", "AGFsaWNlAHNlY3JldA==")).unwrap();
        assert_eq!(out, "a OK AUTHENTICATE completed\r\n");
        assert!(run(&mut session, "b SELECT INBOX").contains("b OK [READ-WRITE]"));
    }

    #[test]
    fn test_select_reports_counts() {
        let (mut session, mailbox, _) = logged_in();
        deliver(&mailbox, "one");
        deliver(&mailbox, "two");
        let out = run(&mut session, "a2 SELECT INBOX");
        assert!(out.contains("* 2 EXISTS\r\n"));
        assert!(out.contains("* 2 RECENT\r\n"));
        assert!(out.contains("* OK [UNSEEN 1]"));
        assert!(out.contains("* OK [UIDNEXT 3]"));
        assert!(out.ends_with("a2 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[test]
    fn test_fetch_marks_seen() {
        let (mut session, mailbox, _) = logged_in();
        deliver(&mailbox, "one");
        run(&mut session, "a SELECT INBOX");
        let out = run(&mut session, "b FETCH 1 (BODY.PEEK[HEADER.FIELDS (SUBJECT)])");
        assert!(!out.contains("\\Seen"));
        let out = run(&mut session, "c UID FETCH 1 BODY[TEXT]");
        assert!(out.starts_with("* 1 FETCH (UID 1 BODY[TEXT] {7}\r\nhello\r\n FLAGS (\\Seen))\r\n"));
        assert!(mailbox.snapshot(INBOX).unwrap()[0].has_flag(SEEN));
    }

    #[test]
    fn test_fetch_empty_folder() {
        let (mut session, _, _) = logged_in();
        run(&mut session, "a SELECT INBOX");
        assert_eq!(run(&mut session, "b FETCH 1:* (FLAGS)"), "b OK FETCH completed\r\n");
    }

    #[test]
    fn test_uid_expunge_single_message() {
        let (mut session, mailbox, _) = logged_in();
        for i in 0..144 {
            deliver(&mailbox, &i.to_string());
        }
        let remove: Vec<u32> = (1..=142).collect();
        mailbox
            .store(
                INBOX,
                &SequenceSet::from_values(&remove),
                true,
                FlagMode::Add,
                &["\\Deleted".to_string()],
            )
            .unwrap();
        mailbox.expunge(INBOX, None).unwrap();

        run(&mut session, "a SELECT INBOX");
        run(&mut session, "b UID STORE 143 +FLAGS.SILENT (\\Deleted)");
        let out = run(&mut session, "c UID EXPUNGE 143");
        assert_eq!(out, "* 1 EXPUNGE\r\nc OK EXPUNGE completed\r\n");
        let left = mailbox.snapshot(INBOX).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].uid, 144);
    }

    #[test]
    fn test_fetch_after_expunge_skips_removed() {
        let (mut session, mailbox, _) = logged_in();
        for i in 0..3 {
            deliver(&mailbox, &i.to_string());
        }
        run(&mut session, "a SELECT INBOX");
        run(&mut session, "b STORE 1:2 +FLAGS.SILENT (\\Deleted)");
        assert_eq!(
            run(&mut session, "c EXPUNGE"),
            "* 2 EXPUNGE\r\n* 1 EXPUNGE\r\nc OK EXPUNGE completed\r\n"
        );

        assert_eq!(
            run(&mut session, "d UID FETCH 1:* (UID)"),
            "* 1 FETCH (UID 3)\r\nd OK FETCH completed\r\n"
        );
        assert_eq!(
            run(&mut session, "e FETCH 1:* (FLAGS)"),
            "* 1 FETCH (FLAGS ())\r\ne OK FETCH completed\r\n"
        );
        assert_eq!(run(&mut session, "f UID FETCH 1:2 (UID)"), "f OK FETCH completed\r\n");
        assert_eq!(run(&mut session, "g FETCH 2:3 (UID)"), "g OK FETCH completed\r\n");
    }

    #[test]
    fn test_folder_errors() {
        let (mut session, _, monitor) = logged_in();
        assert_eq!(run(&mut session, "a CREATE Archive"), "a OK CREATE completed\r\n");
        assert!(run(&mut session, "b CREATE Archive").starts_with("b NO [ALREADYEXISTS]"));
        assert!(run(&mut session, "c SELECT Nope").starts_with("c NO [NONEXISTENT]"));
        run(&mut session, "d SELECT INBOX");
        assert!(run(&mut session, "e COPY 1 Nope").starts_with("e NO [TRYCREATE]"));
        assert_eq!(monitor.mail.requests_errors_total.value(&["imap", "CREATE"]), Some(1.0));
    }

    #[test]
    fn test_copy_and_move() {
        let (mut session, mailbox, _) = logged_in();
        deliver(&mailbox, "one");
        deliver(&mailbox, "two");
        run(&mut session, "a CREATE Archive");
        run(&mut session, "b SELECT INBOX");
        let out = run(&mut session, "c COPY 1:2 Archive");
        assert!(out.starts_with("c OK [COPYUID "));
        assert!(out.contains(" 1:2 1:2] "));
        let out = run(&mut session, "d UID MOVE 2 Archive");
        assert!(out.contains("* OK [COPYUID "));
        assert!(out.contains("* 2 EXPUNGE\r\n"));
        assert_eq!(mailbox.status("Archive").unwrap().messages, 3);
    }

    #[test]
    fn test_list_and_status() {
        let (mut session, mailbox, _) = logged_in();
        run(&mut session, "a CREATE Work/Projects");
        deliver(&mailbox, "one");
        let out = run(&mut session, "b LIST \"\" *");
        assert!(out.starts_with("* LIST (\\HasNoChildren \\Subscribed) \"/\" \"INBOX\"\r\n"));
        assert!(out.contains("\"Work/Projects\""));
        assert_eq!(run(&mut session, "c LIST \"\" \"\""), "* LIST (\\Noselect) \"/\" \"\"\r\nc OK LIST completed\r\n");
        let out = run(&mut session, "d STATUS INBOX (MESSAGES UNSEEN UIDNEXT)");
        assert_eq!(out, "* STATUS \"INBOX\" (MESSAGES 1 UNSEEN 1 UIDNEXT 2)\r\nd OK STATUS completed\r\n");
    }

    #[test]
    fn test_append_and_search() {
        let (mut session, _, _) = logged_in();
        let out = run(&mut session, "a APPEND INBOX (\\Seen) {30}\r\nSubject: report\r\n\r\nquarterly\r\n");
        assert!(out.starts_with("a OK [APPENDUID "));
        run(&mut session, "b APPEND INBOX {26}\r\nSubject: lunch\r\n\r\npizza?\r\n");
        run(&mut session, "c SELECT INBOX");
        assert_eq!(run(&mut session, "d SEARCH UNSEEN"), "* SEARCH 2\r\nd OK SEARCH completed\r\n");
        assert_eq!(run(&mut session, "e UID SEARCH BODY quarterly"), "* SEARCH 1\r\ne OK SEARCH completed\r\n");
    }

    #[test]
    fn test_examine_is_read_only() {
        let (mut session, mailbox, _) = logged_in();
        deliver(&mailbox, "one");
        assert!(run(&mut session, "a EXAMINE INBOX").contains("a OK [READ-ONLY]"));
        assert!(run(&mut session, "b STORE 1 +FLAGS (\\Seen)").starts_with("b NO [READ-ONLY]"));
        run(&mut session, "c FETCH 1 BODY[]");
        assert!(!mailbox.snapshot(INBOX).unwrap()[0].has_flag(SEEN));
    }

    #[test]
    fn test_render_update() {
        assert_eq!(render_update(&Update::Exists(3)), b"* 3 EXISTS\r\n".to_vec());
        assert_eq!(
            render_update(&Update::Flags {
                msn: 1,
                uid: 9,
                flags: vec![SEEN.to_string()]
            }),
            b"* 1 FETCH (UID 9 FLAGS (\\Seen))\r\n".to_vec()
        );
    }
}
