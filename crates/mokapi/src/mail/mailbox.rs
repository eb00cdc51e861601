//! Mailboxes, folders and their messages.
//!
//! Folder paths use `/` as hierarchy delimiter and are stored flat. `INBOX`
//! is case-insensitive and always canonicalised to upper case. Within a
//! folder UIDs strictly increase; sequence numbers are positions at query
//! time and shift after an expunge.

use super::error::MailError;
use super::message::Message;
use super::sequence::SequenceSet;
use crate::spec::mail::{FolderConfig, MailboxConfig};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub const INBOX: &str = "INBOX";
pub const DELIMITER: char = '/';

pub const SEEN: &str = "\\Seen";
pub const ANSWERED: &str = "\\Answered";
pub const FLAGGED: &str = "\\Flagged";
pub const DELETED: &str = "\\Deleted";
pub const DRAFT: &str = "\\Draft";
pub const RECENT: &str = "\\Recent";

/// Flags clients may set with STORE and APPEND.
pub const PERMANENT_FLAGS: &[&str] = &[SEEN, ANSWERED, FLAGGED, DELETED, DRAFT];

const WATCH_BUFFER: usize = 64;

/// Canonical form of a folder path.
pub fn canonical(name: &str) -> String {
    let name = name.trim_matches(DELIMITER);
    match name.split_once(DELIMITER) {
        Some((head, rest)) if head.eq_ignore_ascii_case(INBOX) => format!("{INBOX}{DELIMITER}{rest}"),
        None if name.eq_ignore_ascii_case(INBOX) => INBOX.to_string(),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Mail {
    pub message: Arc<Message>,
    pub uid: u32,
    pub flags: Vec<String>,
    pub received: DateTime<Utc>,
}

impl Mail {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    fn apply(&mut self, mode: FlagMode, flags: &[String]) {
        match mode {
            FlagMode::Add => {
                for flag in flags {
                    if !self.has_flag(flag) {
                        self.flags.push(flag.clone());
                    }
                }
            }
            FlagMode::Remove => self
                .flags
                .retain(|f| !flags.iter().any(|r| r.eq_ignore_ascii_case(f))),
            FlagMode::Replace => {
                let recent = self.has_flag(RECENT);
                self.flags = flags.to_vec();
                if recent && !self.has_flag(RECENT) {
                    self.flags.push(RECENT.to_string());
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMode {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    /// Attributes such as `\Trash` or `\Sent`.
    pub attributes: Vec<String>,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub messages: Vec<Mail>,
    pub subscribed: bool,
}

impl Folder {
    fn new(name: &str, uid_validity: u32) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            uid_next: 1,
            uid_validity,
            messages: Vec::new(),
            subscribed: true,
        }
    }

    fn max_uid(&self) -> u32 {
        self.messages.last().map(|m| m.uid).unwrap_or(0)
    }

    fn in_set(&self, index: usize, set: &SequenceSet, uid: bool) -> bool {
        if uid {
            set.contains(self.messages[index].uid, self.max_uid())
        } else {
            set.contains(index as u32 + 1, self.messages.len() as u32)
        }
    }

    fn push(&mut self, message: Arc<Message>, flags: Vec<String>, received: DateTime<Utc>) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.push(Mail {
            message,
            uid,
            flags,
            received,
        });
        uid
    }

    fn status(&self) -> FolderStatus {
        FolderStatus {
            name: self.name.clone(),
            messages: self.messages.len(),
            recent: self.messages.iter().filter(|m| m.has_flag(RECENT)).count(),
            unseen: self.messages.iter().filter(|m| !m.has_flag(SEEN)).count(),
            first_unseen: self.messages.iter().position(|m| !m.has_flag(SEEN)).map(|i| i + 1),
            uid_next: self.uid_next,
            uid_validity: self.uid_validity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderStatus {
    pub name: String,
    pub messages: usize,
    pub recent: usize,
    pub unseen: usize,
    /// Sequence number of the first unseen message.
    pub first_unseen: Option<usize>,
    pub uid_next: u32,
    pub uid_validity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub uid_validity: u32,
    pub source: Vec<u32>,
    pub dest: Vec<u32>,
}

/// Change pushed to IDLE sessions watching a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Exists(usize),
    Expunge(usize),
    Flags { msn: usize, uid: u32, flags: Vec<String> },
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    username: String,
    password: String,
    description: String,
}

struct Folders {
    next_uid_validity: u32,
    map: BTreeMap<String, Folder>,
}

impl Folders {
    fn get(&self, name: &str) -> Result<&Folder, MailError> {
        self.map
            .get(name)
            .ok_or_else(|| MailError::NoSuchFolder(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Folder, MailError> {
        self.map
            .get_mut(name)
            .ok_or_else(|| MailError::NoSuchFolder(name.to_string()))
    }

    fn next_validity(&mut self) -> u32 {
        let v = self.next_uid_validity;
        self.next_uid_validity += 1;
        v
    }

    /// Creates `name` and any missing parents.
    fn ensure(&mut self, name: &str) -> &mut Folder {
        let mut path = String::new();
        for segment in name.split(DELIMITER) {
            if !path.is_empty() {
                path.push(DELIMITER);
            }
            path.push_str(segment);
            if !self.map.contains_key(&path) {
                let validity = self.next_validity();
                self.map.insert(path.clone(), Folder::new(&path, validity));
            }
        }
        self.map.entry(name.to_string()).or_insert_with(|| Folder::new(name, 0))
    }

    fn has_children(&self, name: &str) -> bool {
        let prefix = format!("{name}{DELIMITER}");
        self.map.keys().any(|k| k.starts_with(&prefix))
    }
}

struct Watcher {
    id: u64,
    folder: String,
    tx: mpsc::Sender<Update>,
}

static WATCHER_ID: AtomicU64 = AtomicU64::new(1);

pub struct Mailbox {
    pub name: String,
    credentials: RwLock<Credentials>,
    folders: Mutex<Folders>,
    watchers: Mutex<Vec<Watcher>>,
}

impl Mailbox {
    pub fn new(name: &str) -> Self {
        let mut folders = Folders {
            next_uid_validity: 1,
            map: BTreeMap::new(),
        };
        folders.ensure(INBOX);
        Self {
            name: name.to_string(),
            credentials: RwLock::new(Credentials::default()),
            folders: Mutex::new(folders),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Applies declared credentials and folders. Existing folders and their
    /// messages are kept.
    pub fn configure(&self, config: &MailboxConfig) {
        *self.credentials.write() = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            description: config.description.clone(),
        };
        let mut folders = self.folders.lock();
        for folder in &config.folders {
            configure_folder(&mut folders, "", folder);
        }
    }

    pub fn username(&self) -> String {
        self.credentials.read().username.clone()
    }

    pub fn description(&self) -> String {
        self.credentials.read().description.clone()
    }

    pub fn requires_auth(&self) -> bool {
        !self.credentials.read().password.is_empty()
    }

    /// Matches the login name against the username or the address.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let credentials = self.credentials.read();
        let user_ok = username.eq_ignore_ascii_case(&self.name)
            || (!credentials.username.is_empty() && username == credentials.username);
        user_ok && (credentials.password.is_empty() || credentials.password == password)
    }

    // ========================================================================
    // Folder management
    // ========================================================================

    pub fn folder_names(&self) -> Vec<String> {
        self.folders.lock().map.keys().cloned().collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.folders.lock().map.contains_key(&canonical(name))
    }

    /// Opens a folder. INBOX is created when missing. A read-write select
    /// clears the `\Recent` flags after reporting them.
    pub fn select(&self, name: &str, read_only: bool) -> Result<FolderStatus, MailError> {
        let name = canonical(name);
        let mut folders = self.folders.lock();
        if name == INBOX {
            folders.ensure(INBOX);
        }
        let folder = folders.get_mut(&name)?;
        let status = folder.status();
        if !read_only {
            for mail in folder.messages.iter_mut() {
                mail.flags.retain(|f| !f.eq_ignore_ascii_case(RECENT));
            }
        }
        Ok(status)
    }

    pub fn status(&self, name: &str) -> Result<FolderStatus, MailError> {
        let name = canonical(name);
        Ok(self.folders.lock().get(&name)?.status())
    }

    pub fn create(&self, name: &str) -> Result<(), MailError> {
        let name = canonical(name);
        if name.is_empty() {
            return Err(MailError::InvalidName(name));
        }
        let mut folders = self.folders.lock();
        if folders.map.contains_key(&name) {
            return Err(MailError::FolderExists(name));
        }
        folders.ensure(&name);
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), MailError> {
        let name = canonical(name);
        if name == INBOX {
            return Err(MailError::DeleteInbox);
        }
        let mut folders = self.folders.lock();
        folders.get(&name)?;
        if folders.has_children(&name) {
            return Err(MailError::HasInferiors(name));
        }
        folders.map.remove(&name);
        Ok(())
    }

    /// Renames a folder with its inferiors. Renaming INBOX moves its
    /// messages into the new folder and leaves an empty INBOX behind.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), MailError> {
        let from = canonical(from);
        let to = canonical(to);
        if to.is_empty() {
            return Err(MailError::InvalidName(to));
        }
        let mut folders = self.folders.lock();
        folders.get(&from)?;
        if folders.map.contains_key(&to) {
            return Err(MailError::FolderExists(to));
        }

        if from == INBOX {
            let validity = folders.next_validity();
            let inbox = folders.get_mut(INBOX)?;
            let mut moved = Folder::new(&to, inbox.uid_validity);
            moved.messages = std::mem::take(&mut inbox.messages);
            moved.uid_next = inbox.uid_next;
            moved.attributes = inbox.attributes.clone();
            inbox.uid_next = 1;
            inbox.uid_validity = validity;
            if let Some((parent, _)) = to.rsplit_once(DELIMITER) {
                folders.ensure(parent);
            }
            folders.map.insert(to, moved);
            return Ok(());
        }

        let prefix = format!("{from}{DELIMITER}");
        let affected: Vec<String> = folders
            .map
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        if let Some((parent, _)) = to.rsplit_once(DELIMITER) {
            folders.ensure(parent);
        }
        for old in affected {
            if let Some(mut folder) = folders.map.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                folder.name = new.clone();
                folders.map.insert(new, folder);
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, name: &str, subscribed: bool) -> Result<(), MailError> {
        let name = canonical(name);
        self.folders.lock().get_mut(&name)?.subscribed = subscribed;
        Ok(())
    }

    /// Folders matching `reference` + `pattern`, where `*` matches any
    /// characters and `%` any characters but the delimiter. INBOX comes
    /// first.
    pub fn list(&self, reference: &str, pattern: &str, subscribed_only: bool) -> Vec<ListEntry> {
        let pattern = canonical_pattern(&format!("{reference}{pattern}"));
        let folders = self.folders.lock();
        let mut entries: Vec<ListEntry> = folders
            .map
            .values()
            .filter(|f| !subscribed_only || f.subscribed)
            .filter(|f| wildcard_match(pattern.as_bytes(), f.name.as_bytes()))
            .map(|f| {
                let mut attributes = vec![if folders.has_children(&f.name) {
                    "\\HasChildren".to_string()
                } else {
                    "\\HasNoChildren".to_string()
                }];
                if f.subscribed {
                    attributes.push("\\Subscribed".to_string());
                }
                attributes.extend(f.attributes.iter().cloned());
                ListEntry {
                    name: f.name.clone(),
                    attributes,
                }
            })
            .collect();
        entries.sort_by(|a, b| (a.name != INBOX, &a.name).cmp(&(b.name != INBOX, &b.name)));
        entries
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Appends a message. Without explicit flags it is marked `\Recent`.
    pub fn append(
        &self,
        folder: &str,
        message: Arc<Message>,
        flags: Option<Vec<String>>,
        received: Option<DateTime<Utc>>,
    ) -> Result<(u32, u32), MailError> {
        let name = canonical(folder);
        let mut folders = self.folders.lock();
        if name == INBOX {
            folders.ensure(INBOX);
        }
        let f = folders.get_mut(&name)?;
        let flags = flags.unwrap_or_else(|| vec![RECENT.to_string()]);
        let uid = f.push(message, flags, received.unwrap_or_else(Utc::now));
        let exists = f.messages.len();
        let validity = f.uid_validity;
        self.publish(&name, Update::Exists(exists));
        Ok((validity, uid))
    }

    /// Removes the oldest messages of `folder` beyond `max`.
    pub fn truncate(&self, folder: &str, max: usize) {
        let name = canonical(folder);
        let mut folders = self.folders.lock();
        let Ok(f) = folders.get_mut(&name) else {
            return;
        };
        while f.messages.len() > max {
            f.messages.remove(0);
            self.publish(&name, Update::Expunge(1));
        }
    }

    /// Messages in `set` with their sequence numbers.
    pub fn messages(&self, folder: &str, set: &SequenceSet, uid: bool) -> Result<Vec<(usize, Mail)>, MailError> {
        let name = canonical(folder);
        let folders = self.folders.lock();
        let f = folders.get(&name)?;
        Ok((0..f.messages.len())
            .filter(|i| f.in_set(*i, set, uid))
            .map(|i| (i + 1, f.messages[i].clone()))
            .collect())
    }

    /// All messages of a folder in sequence order.
    pub fn snapshot(&self, folder: &str) -> Result<Vec<Mail>, MailError> {
        let name = canonical(folder);
        Ok(self.folders.lock().get(&name)?.messages.clone())
    }

    /// Changes flags and returns `(msn, uid, flags)` of every changed
    /// message.
    pub fn store(
        &self,
        folder: &str,
        set: &SequenceSet,
        uid: bool,
        mode: FlagMode,
        flags: &[String],
    ) -> Result<Vec<(usize, u32, Vec<String>)>, MailError> {
        let name = canonical(folder);
        let flags: Vec<String> = flags
            .iter()
            .filter(|f| !f.eq_ignore_ascii_case(RECENT))
            .cloned()
            .collect();
        let mut folders = self.folders.lock();
        let f = folders.get_mut(&name)?;
        let mut changed = Vec::new();
        for i in 0..f.messages.len() {
            if !f.in_set(i, set, uid) {
                continue;
            }
            let mail = &mut f.messages[i];
            mail.apply(mode, &flags);
            changed.push((i + 1, mail.uid, mail.flags.clone()));
        }
        for (msn, uid, flags) in &changed {
            self.publish(
                &name,
                Update::Flags {
                    msn: *msn,
                    uid: *uid,
                    flags: flags.clone(),
                },
            );
        }
        Ok(changed)
    }

    /// Removes messages flagged `\Deleted`, restricted to `scope` when given.
    /// Returns `(msn, uid)` of each removed message, highest sequence number
    /// first.
    pub fn expunge(&self, folder: &str, scope: Option<(&SequenceSet, bool)>) -> Result<Vec<(usize, u32)>, MailError> {
        let name = canonical(folder);
        let mut folders = self.folders.lock();
        let f = folders.get_mut(&name)?;
        let mut removed = Vec::new();
        for i in (0..f.messages.len()).rev() {
            let in_scope = scope.map(|(set, uid)| f.in_set(i, set, uid)).unwrap_or(true);
            if in_scope && f.messages[i].has_flag(DELETED) {
                let mail = f.messages.remove(i);
                removed.push((i + 1, mail.uid));
                self.publish(&name, Update::Expunge(i + 1));
            }
        }
        Ok(removed)
    }

    /// Copies messages to `dest`, assigning fresh UIDs there.
    pub fn copy(&self, folder: &str, set: &SequenceSet, uid: bool, dest: &str) -> Result<CopyResult, MailError> {
        let name = canonical(folder);
        let dest = canonical(dest);
        let mut folders = self.folders.lock();
        folders.get(&dest)?;
        let source: Vec<Mail> = {
            let f = folders.get(&name)?;
            (0..f.messages.len())
                .filter(|i| f.in_set(*i, set, uid))
                .map(|i| f.messages[i].clone())
                .collect()
        };

        let target = folders.get_mut(&dest)?;
        let mut result = CopyResult {
            uid_validity: target.uid_validity,
            source: Vec::new(),
            dest: Vec::new(),
        };
        for mail in source {
            let mut flags = mail.flags.clone();
            if !mail.has_flag(RECENT) {
                flags.push(RECENT.to_string());
            }
            let new_uid = target.push(mail.message, flags, mail.received);
            result.source.push(mail.uid);
            result.dest.push(new_uid);
        }
        let exists = target.messages.len();
        if !result.dest.is_empty() {
            self.publish(&dest, Update::Exists(exists));
        }
        Ok(result)
    }

    /// Copies messages to `dest` and removes them from `folder`. Also returns
    /// the sequence numbers removed, highest first.
    pub fn move_to(
        &self,
        folder: &str,
        set: &SequenceSet,
        uid: bool,
        dest: &str,
    ) -> Result<(CopyResult, Vec<usize>), MailError> {
        let result = self.copy(folder, set, uid, dest)?;
        let name = canonical(folder);
        let mut folders = self.folders.lock();
        let f = folders.get_mut(&name)?;
        let mut removed = Vec::new();
        for i in (0..f.messages.len()).rev() {
            if result.source.contains(&f.messages[i].uid) {
                f.messages.remove(i);
                removed.push(i + 1);
                self.publish(&name, Update::Expunge(i + 1));
            }
        }
        Ok((result, removed))
    }

    // ========================================================================
    // IDLE notifications
    // ========================================================================

    /// Registers a watcher for changes of `folder`.
    pub fn watch(&self, folder: &str) -> (u64, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let id = WATCHER_ID.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().push(Watcher {
            id,
            folder: canonical(folder),
            tx,
        });
        (id, rx)
    }

    pub fn unwatch(&self, id: u64) {
        self.watchers.lock().retain(|w| w.id != id);
    }

    /// Delivers an update without blocking. A full watcher loses the update.
    fn publish(&self, folder: &str, update: Update) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| {
            if w.folder != folder {
                return true;
            }
            match w.tx.try_send(update.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("mailbox {}: dropping update for slow IDLE client", self.name);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

fn configure_folder(folders: &mut Folders, parent: &str, config: &FolderConfig) {
    let path = if parent.is_empty() {
        canonical(&config.name)
    } else {
        format!("{parent}{DELIMITER}{}", config.name)
    };
    if path.is_empty() {
        return;
    }
    let folder = folders.ensure(&path);
    for flag in &config.flags {
        if !folder.attributes.iter().any(|a| a.eq_ignore_ascii_case(flag)) {
            folder.attributes.push(flag.clone());
        }
    }
    for child in &config.folders {
        configure_folder(folders, &path, child);
    }
}

fn canonical_pattern(pattern: &str) -> String {
    let head_len = pattern.find(DELIMITER).unwrap_or(pattern.len());
    if pattern[..head_len].eq_ignore_ascii_case(INBOX) {
        format!("{INBOX}{}", &pattern[head_len..])
    } else {
        pattern.to_string()
    }
}

fn wildcard_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|i| wildcard_match(rest, &name[i..])),
        Some((b'%', rest)) => {
            let limit = name
                .iter()
                .position(|c| *c == DELIMITER as u8)
                .unwrap_or(name.len());
            (0..=limit).any(|i| wildcard_match(rest, &name[i..]))
        }
        Some((c, rest)) => name.first() == Some(c) && wildcard_match(rest, &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject: &str) -> Arc<Message> {
        Arc::new(Message::parse(format!("Subject: {subject}\r\n\r\nbody").into_bytes()))
    }

    fn uids(mailbox: &Mailbox, folder: &str) -> Vec<u32> {
        mailbox.snapshot(folder).unwrap().iter().map(|m| m.uid).collect()
    }

    #[test]
    fn test_canonical_inbox() {
        assert_eq!(canonical("inbox"), "INBOX");
        assert_eq!(canonical("Inbox/Sub"), "INBOX/Sub");
        assert_eq!(canonical("Inboxes"), "Inboxes");
    }

    #[test]
    fn test_append_assigns_increasing_uids_and_recent() {
        let mb = Mailbox::new("alice@mokapi.io");
        assert_eq!(mb.append(INBOX, message("a"), None, None).unwrap().1, 1);
        assert_eq!(mb.append(INBOX, message("b"), Some(vec![SEEN.into()]), None).unwrap().1, 2);
        let status = mb.status(INBOX).unwrap();
        assert_eq!(status.messages, 2);
        assert_eq!(status.recent, 1);
        assert_eq!(status.unseen, 1);
        assert_eq!(status.uid_next, 3);

        mb.select("inbox", false).unwrap();
        assert_eq!(mb.status(INBOX).unwrap().recent, 0);
    }

    #[test]
    fn test_uid_expunge_restricts_to_set() {
        let mb = Mailbox::new("alice@mokapi.io");
        for i in 0..144 {
            mb.append(INBOX, message(&i.to_string()), None, None).unwrap();
        }
        let all: SequenceSet = "1:*".parse().unwrap();
        mb.store(INBOX, &all, false, FlagMode::Add, &[DELETED.to_string()]).unwrap();
        let first: SequenceSet = "1:142".parse().unwrap();
        mb.expunge(INBOX, Some((&first, true))).unwrap();
        assert_eq!(uids(&mb, INBOX), vec![143, 144]);

        let set: SequenceSet = "143".parse().unwrap();
        let removed = mb.expunge(INBOX, Some((&set, true))).unwrap();
        assert_eq!(removed, vec![(1, 143)]);
        assert_eq!(uids(&mb, INBOX), vec![144]);
    }

    #[test]
    fn test_expunge_reports_descending() {
        let mb = Mailbox::new("a");
        for i in 0..4 {
            mb.append(INBOX, message(&i.to_string()), None, None).unwrap();
        }
        let set: SequenceSet = "1,3".parse().unwrap();
        mb.store(INBOX, &set, false, FlagMode::Add, &[DELETED.to_string()]).unwrap();
        let removed: Vec<usize> = mb.expunge(INBOX, None).unwrap().into_iter().map(|(m, _)| m).collect();
        assert_eq!(removed, vec![3, 1]);
        assert_eq!(uids(&mb, INBOX), vec![2, 4]);
    }

    #[test]
    fn test_flag_modes() {
        let mb = Mailbox::new("a");
        mb.append(INBOX, message("x"), Some(vec![]), None).unwrap();
        let set: SequenceSet = "1".parse().unwrap();
        mb.store(INBOX, &set, false, FlagMode::Add, &[SEEN.into(), SEEN.into(), FLAGGED.into()]).unwrap();
        let changed = mb.store(INBOX, &set, false, FlagMode::Remove, &["\\seen".into()]).unwrap();
        assert_eq!(changed[0].2, vec![FLAGGED.to_string()]);
        let changed = mb.store(INBOX, &set, false, FlagMode::Replace, &[DRAFT.into()]).unwrap();
        assert_eq!(changed[0].2, vec![DRAFT.to_string()]);
    }

    #[test]
    fn test_rename_inbox_keeps_empty_inbox() {
        let mb = Mailbox::new("a");
        mb.append(INBOX, message("1"), None, None).unwrap();
        mb.append(INBOX, message("2"), None, None).unwrap();
        let before = mb.status(INBOX).unwrap().uid_validity;

        mb.rename("INBOX", "old").unwrap();
        let inbox = mb.status(INBOX).unwrap();
        assert_eq!(inbox.messages, 0);
        assert_ne!(inbox.uid_validity, before);
        assert_eq!(uids(&mb, "old"), vec![1, 2]);
    }

    #[test]
    fn test_rename_moves_inferiors() {
        let mb = Mailbox::new("a");
        mb.create("Work/2024").unwrap();
        mb.rename("Work", "Archive/Work").unwrap();
        assert!(mb.exists("Archive"));
        assert!(mb.exists("Archive/Work/2024"));
        assert!(!mb.exists("Work"));
        assert_eq!(mb.rename("Nope", "X").unwrap_err(), MailError::NoSuchFolder("Nope".into()));
    }

    #[test]
    fn test_delete_rules() {
        let mb = Mailbox::new("a");
        assert_eq!(mb.delete("inbox").unwrap_err(), MailError::DeleteInbox);
        mb.create("Foo/Bar").unwrap();
        assert_eq!(mb.delete("Foo").unwrap_err(), MailError::HasInferiors("Foo".into()));
        mb.delete("Foo/Bar").unwrap();
        mb.delete("Foo").unwrap();
        assert_eq!(mb.create("INBOX").unwrap_err(), MailError::FolderExists("INBOX".into()));
    }

    #[test]
    fn test_copy_and_move() {
        let mb = Mailbox::new("a");
        mb.create("Trash").unwrap();
        mb.append(INBOX, message("1"), Some(vec![SEEN.into()]), None).unwrap();
        mb.append(INBOX, message("2"), None, None).unwrap();

        let all: SequenceSet = "1:*".parse().unwrap();
        let copied = mb.copy(INBOX, &all, false, "Trash").unwrap();
        assert_eq!(copied.source, vec![1, 2]);
        assert_eq!(copied.dest, vec![1, 2]);

        let set: SequenceSet = "2".parse().unwrap();
        let (moved, removed) = mb.move_to(INBOX, &set, true, "Trash").unwrap();
        assert_eq!(moved.dest, vec![3]);
        assert_eq!(removed, vec![2]);
        assert_eq!(uids(&mb, INBOX), vec![1]);
        assert!(matches!(mb.copy(INBOX, &all, false, "Nope"), Err(MailError::NoSuchFolder(_))));
    }

    #[test]
    fn test_list_wildcards() {
        let mb = Mailbox::new("a");
        mb.create("Archive/2023").unwrap();
        mb.create("Drafts").unwrap();
        let names = |entries: Vec<ListEntry>| entries.into_iter().map(|e| e.name).collect::<Vec<_>>();

        assert_eq!(names(mb.list("", "*", false)), vec!["INBOX", "Archive", "Archive/2023", "Drafts"]);
        assert_eq!(names(mb.list("", "%", false)), vec!["INBOX", "Archive", "Drafts"]);
        assert_eq!(names(mb.list("Archive/", "%", false)), vec!["Archive/2023"]);
        assert_eq!(names(mb.list("", "inbox", false)), vec!["INBOX"]);
        let archive = &mb.list("", "Archive", false)[0];
        assert!(archive.attributes.contains(&"\\HasChildren".to_string()));
    }

    #[tokio::test]
    async fn test_watch_receives_updates_in_order() {
        let mb = Mailbox::new("a");
        let (id, mut rx) = mb.watch(INBOX);
        mb.append(INBOX, message("1"), None, None).unwrap();
        let set: SequenceSet = "1".parse().unwrap();
        mb.store(INBOX, &set, false, FlagMode::Add, &[DELETED.to_string()]).unwrap();
        mb.expunge(INBOX, None).unwrap();

        assert_eq!(rx.recv().await, Some(Update::Exists(1)));
        assert!(matches!(rx.recv().await, Some(Update::Flags { msn: 1, uid: 1, .. })));
        assert_eq!(rx.recv().await, Some(Update::Expunge(1)));

        mb.unwatch(id);
        mb.append(INBOX, message("2"), None, None).unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_configure_folders_and_auth() {
        let config: MailboxConfig = serde_yaml::from_str(
            "name: bob@mokapi.io\nusername: bob\npassword: secret\nfolders:\n  - name: Trash\n    flags: ['\\Trash']\n    folders:\n      - name: Old\n",
        )
        .unwrap();
        let mb = Mailbox::new("bob@mokapi.io");
        mb.configure(&config);
        assert!(mb.exists("Trash/Old"));
        assert!(mb.authenticate("bob", "secret"));
        assert!(mb.authenticate("bob@mokapi.io", "secret"));
        assert!(!mb.authenticate("bob", "wrong"));
        assert!(mb.requires_auth());
        let trash = &mb.list("", "Trash", false)[0];
        assert!(trash.attributes.contains(&"\\Trash".to_string()));
    }
}
