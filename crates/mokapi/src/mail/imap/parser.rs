//! IMAP command syntax.
//!
//! The connection loop hands over a complete command with literals already
//! inlined (`{n}\r\n` followed by the n bytes). The tokenizer understands
//! atoms, quoted strings, literals and parenthesized lists; fetch attributes
//! like `BODY[HEADER.FIELDS (FROM)]<0.10>` stay one atom.

use super::fetch::{self, FetchItem};
use super::search::{self, Criteria};
use crate::mail::mailbox::FlagMode;
use crate::mail::sequence::SequenceSet;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImapError {
    #[error("{0}")]
    Syntax(String),
    #[error("unknown command {0}")]
    UnknownCommand(String),
}

pub fn syntax(message: impl Into<String>) -> ImapError {
    ImapError::Syntax(message.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    Quoted(String),
    Literal(Vec<u8>),
    List(Vec<Token>),
}

impl Token {
    /// Atom, quoted string or literal as text.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Token::Atom(s) | Token::Quoted(s) => Some(s.clone()),
            Token::Literal(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Token::List(_) => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Token::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Token]> {
        match self {
            Token::List(l) => Some(l),
            _ => None,
        }
    }
}

pub fn tokenize(input: &[u8]) -> Result<Vec<Token>, ImapError> {
    let mut pos = 0;
    let tokens = tokenize_until(input, &mut pos, false)?;
    Ok(tokens)
}

fn tokenize_until(input: &[u8], pos: &mut usize, in_list: bool) -> Result<Vec<Token>, ImapError> {
    let mut tokens = Vec::new();
    while *pos < input.len() {
        match input[*pos] {
            b' ' | b'\r' | b'\n' => *pos += 1,
            b'(' => {
                *pos += 1;
                tokens.push(Token::List(tokenize_until(input, pos, true)?));
            }
            b')' => {
                *pos += 1;
                if in_list {
                    return Ok(tokens);
                }
                return Err(syntax("unexpected ')'"));
            }
            b'"' => tokens.push(Token::Quoted(quoted(input, pos)?)),
            b'{' => tokens.push(Token::Literal(literal(input, pos)?)),
            _ => tokens.push(Token::Atom(atom(input, pos))),
        }
    }
    if in_list {
        return Err(syntax("missing ')'"));
    }
    Ok(tokens)
}

fn quoted(input: &[u8], pos: &mut usize) -> Result<String, ImapError> {
    *pos += 1;
    let mut out = Vec::new();
    while *pos < input.len() {
        let c = input[*pos];
        *pos += 1;
        match c {
            b'\\' if *pos < input.len() => {
                out.push(input[*pos]);
                *pos += 1;
            }
            b'"' => return Ok(String::from_utf8_lossy(&out).into_owned()),
            _ => out.push(c),
        }
    }
    Err(syntax("unterminated quoted string"))
}

fn literal(input: &[u8], pos: &mut usize) -> Result<Vec<u8>, ImapError> {
    let close = input[*pos..]
        .iter()
        .position(|c| *c == b'}')
        .ok_or_else(|| syntax("invalid literal"))?;
    let spec = String::from_utf8_lossy(&input[*pos + 1..*pos + close]).into_owned();
    let len: usize = spec
        .trim_end_matches('+')
        .parse()
        .map_err(|_| syntax("invalid literal length"))?;
    *pos += close + 1;
    if input[*pos..].starts_with(b"\r\n") {
        *pos += 2;
    } else if input[*pos..].starts_with(b"\n") {
        *pos += 1;
    }
    let end = *pos + len;
    if end > input.len() {
        return Err(syntax("truncated literal"));
    }
    let data = input[*pos..end].to_vec();
    *pos = end;
    Ok(data)
}

fn atom(input: &[u8], pos: &mut usize) -> String {
    let start = *pos;
    let mut depth = 0usize;
    while *pos < input.len() {
        let c = input[*pos];
        match c {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b' ' | b'(' | b')' | b'\r' | b'\n' if depth == 0 => break,
            _ => {}
        }
        *pos += 1;
    }
    String::from_utf8_lossy(&input[start..*pos]).into_owned()
}

/// Length announced by a trailing `{n}` or `{n+}` on a command line, and
/// whether it is non-synchronizing.
pub fn trailing_literal(line: &[u8]) -> Option<(usize, bool)> {
    let line = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n"))?;
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|c| *c == b'{')?;
    let spec = std::str::from_utf8(&inner[open + 1..]).ok()?;
    match spec.strip_suffix('+') {
        Some(n) => Some((n.parse().ok()?, true)),
        None => Some((spec.parse().ok()?, false)),
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Capability,
    Noop,
    Check,
    Logout,
    Id,
    Login {
        username: String,
        password: String,
    },
    Authenticate {
        mechanism: String,
        initial: Option<String>,
    },
    Select {
        mailbox: String,
        read_only: bool,
    },
    Create(String),
    Delete(String),
    Rename {
        from: String,
        to: String,
    },
    Subscribe(String),
    Unsubscribe(String),
    List {
        reference: String,
        pattern: String,
        subscribed_only: bool,
        lsub: bool,
    },
    Status {
        mailbox: String,
        items: Vec<String>,
    },
    Append {
        mailbox: String,
        flags: Option<Vec<String>>,
        date: Option<DateTime<Utc>>,
        message: Vec<u8>,
    },
    Close,
    Unselect,
    Expunge {
        uids: Option<SequenceSet>,
    },
    Search {
        criteria: Criteria,
        uid: bool,
    },
    Fetch {
        set: SequenceSet,
        items: Vec<FetchItem>,
        uid: bool,
    },
    Store {
        set: SequenceSet,
        mode: FlagMode,
        silent: bool,
        flags: Vec<String>,
        uid: bool,
    },
    Copy {
        set: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    Move {
        set: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    Idle,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Capability => "CAPABILITY",
            Command::Noop => "NOOP",
            Command::Check => "CHECK",
            Command::Logout => "LOGOUT",
            Command::Id => "ID",
            Command::Login { .. } => "LOGIN",
            Command::Authenticate { .. } => "AUTHENTICATE",
            Command::Select { read_only: false, .. } => "SELECT",
            Command::Select { read_only: true, .. } => "EXAMINE",
            Command::Create(_) => "CREATE",
            Command::Delete(_) => "DELETE",
            Command::Rename { .. } => "RENAME",
            Command::Subscribe(_) => "SUBSCRIBE",
            Command::Unsubscribe(_) => "UNSUBSCRIBE",
            Command::List { lsub: false, .. } => "LIST",
            Command::List { lsub: true, .. } => "LSUB",
            Command::Status { .. } => "STATUS",
            Command::Append { .. } => "APPEND",
            Command::Close => "CLOSE",
            Command::Unselect => "UNSELECT",
            Command::Expunge { .. } => "EXPUNGE",
            Command::Search { .. } => "SEARCH",
            Command::Fetch { .. } => "FETCH",
            Command::Store { .. } => "STORE",
            Command::Copy { .. } => "COPY",
            Command::Move { .. } => "MOVE",
            Command::Idle => "IDLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub tag: String,
    pub command: Command,
}

/// Parses one command. On failure the tag is returned when known so the
/// error can be tagged.
pub fn parse(input: &[u8]) -> Result<Request, (Option<String>, ImapError)> {
    let tokens = tokenize(input).map_err(|e| (None, e))?;
    let mut iter = tokens.into_iter();
    let tag = match iter.next() {
        Some(Token::Atom(tag)) => tag,
        _ => return Err((None, syntax("missing tag"))),
    };
    let args: Vec<Token> = iter.collect();
    parse_command(&args)
        .map(|command| Request {
            tag: tag.clone(),
            command,
        })
        .map_err(|e| (Some(tag), e))
}

fn parse_command(tokens: &[Token]) -> Result<Command, ImapError> {
    let name = tokens
        .first()
        .and_then(Token::as_atom)
        .ok_or_else(|| syntax("missing command"))?
        .to_ascii_uppercase();
    let args = &tokens[1..];

    if name == "UID" {
        let sub = args
            .first()
            .and_then(Token::as_atom)
            .ok_or_else(|| syntax("missing UID command"))?
            .to_ascii_uppercase();
        return parse_selected(&sub, &args[1..], true);
    }

    let command = match name.as_str() {
        "CAPABILITY" => Command::Capability,
        "NOOP" => Command::Noop,
        "CHECK" => Command::Check,
        "LOGOUT" => Command::Logout,
        "ID" => Command::Id,
        "IDLE" => Command::Idle,
        "CLOSE" => Command::Close,
        "UNSELECT" => Command::Unselect,
        "LOGIN" => Command::Login {
            username: string_arg(args, 0)?,
            password: string_arg(args, 1)?,
        },
        "AUTHENTICATE" => Command::Authenticate {
            mechanism: string_arg(args, 0)?.to_ascii_uppercase(),
            initial: args.get(1).and_then(Token::as_string),
        },
        "SELECT" | "EXAMINE" => Command::Select {
            mailbox: string_arg(args, 0)?,
            read_only: name == "EXAMINE",
        },
        "CREATE" => Command::Create(string_arg(args, 0)?),
        "DELETE" => Command::Delete(string_arg(args, 0)?),
        "RENAME" => Command::Rename {
            from: string_arg(args, 0)?,
            to: string_arg(args, 1)?,
        },
        "SUBSCRIBE" => Command::Subscribe(string_arg(args, 0)?),
        "UNSUBSCRIBE" => Command::Unsubscribe(string_arg(args, 0)?),
        "LIST" | "LSUB" => parse_list(args, name == "LSUB")?,
        "STATUS" => Command::Status {
            mailbox: string_arg(args, 0)?,
            items: args
                .get(1)
                .and_then(Token::as_list)
                .ok_or_else(|| syntax("STATUS expects an item list"))?
                .iter()
                .filter_map(Token::as_string)
                .map(|s| s.to_ascii_uppercase())
                .collect(),
        },
        "APPEND" => parse_append(args)?,
        _ => return parse_selected(&name, args, false),
    };
    Ok(command)
}

fn parse_selected(name: &str, args: &[Token], uid: bool) -> Result<Command, ImapError> {
    let command = match name {
        "EXPUNGE" => Command::Expunge {
            uids: if uid { Some(set_arg(args, 0)?) } else { None },
        },
        "SEARCH" => Command::Search {
            criteria: search::parse(args)?,
            uid,
        },
        "FETCH" => Command::Fetch {
            set: set_arg(args, 0)?,
            items: fetch::parse_items(args.get(1).ok_or_else(|| syntax("FETCH expects items"))?)?,
            uid,
        },
        "STORE" => {
            let action = string_arg(args, 1)?.to_ascii_uppercase();
            let (mode, rest) = match action.as_bytes().first() {
                Some(b'+') => (FlagMode::Add, &action[1..]),
                Some(b'-') => (FlagMode::Remove, &action[1..]),
                _ => (FlagMode::Replace, action.as_str()),
            };
            let silent = match rest {
                "FLAGS" => false,
                "FLAGS.SILENT" => true,
                _ => return Err(syntax(format!("invalid STORE item {action}"))),
            };
            let flags = match args.get(2) {
                Some(Token::List(list)) => list.iter().filter_map(Token::as_string).collect(),
                Some(_) => args[2..].iter().filter_map(Token::as_string).collect(),
                None => return Err(syntax("STORE expects flags")),
            };
            Command::Store {
                set: set_arg(args, 0)?,
                mode,
                silent,
                flags,
                uid,
            }
        }
        "COPY" => Command::Copy {
            set: set_arg(args, 0)?,
            mailbox: string_arg(args, 1)?,
            uid,
        },
        "MOVE" => Command::Move {
            set: set_arg(args, 0)?,
            mailbox: string_arg(args, 1)?,
            uid,
        },
        _ => return Err(ImapError::UnknownCommand(name.to_string())),
    };
    Ok(command)
}

fn parse_list(args: &[Token], lsub: bool) -> Result<Command, ImapError> {
    let mut args = args;
    let mut subscribed_only = lsub;
    // LIST-EXTENDED selection options
    if let Some(Token::List(options)) = args.first() {
        subscribed_only |= options
            .iter()
            .filter_map(Token::as_atom)
            .any(|o| o.eq_ignore_ascii_case("SUBSCRIBED"));
        args = &args[1..];
    }
    let pattern = match args.get(1) {
        Some(Token::List(patterns)) => patterns
            .first()
            .and_then(Token::as_string)
            .unwrap_or_default(),
        _ => string_arg(args, 1)?,
    };
    Ok(Command::List {
        reference: string_arg(args, 0)?,
        pattern,
        subscribed_only,
        lsub,
    })
}

fn parse_append(args: &[Token]) -> Result<Command, ImapError> {
    let mailbox = string_arg(args, 0)?;
    let mut flags = None;
    let mut date = None;
    let mut message = None;
    for token in &args[1..] {
        match token {
            Token::List(list) => flags = Some(list.iter().filter_map(Token::as_string).collect()),
            Token::Quoted(s) => date = Some(parse_internal_date(s)?),
            Token::Literal(data) => message = Some(data.clone()),
            Token::Atom(a) => return Err(syntax(format!("unexpected {a}"))),
        }
    }
    Ok(Command::Append {
        mailbox,
        flags,
        date,
        message: message.ok_or_else(|| syntax("APPEND expects a message literal"))?,
    })
}

/// Parses `17-Jul-1996 02:44:25 -0700`.
pub fn parse_internal_date(s: &str) -> Result<DateTime<Utc>, ImapError> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z")
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| syntax(format!("invalid date {s}")))
}

fn string_arg(args: &[Token], index: usize) -> Result<String, ImapError> {
    args.get(index)
        .and_then(Token::as_string)
        .ok_or_else(|| syntax("missing argument"))
}

fn set_arg(args: &[Token], index: usize) -> Result<SequenceSet, ImapError> {
    let s = args
        .get(index)
        .and_then(Token::as_atom)
        .ok_or_else(|| syntax("missing sequence set"))?;
    s.parse().map_err(|e: crate::mail::sequence::SequenceError| syntax(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        let tokens = tokenize(b"a1 LOGIN \"al\\\"ice\" {6}\r\nsecret (\\Seen x)").unwrap();
        assert_eq!(tokens[0], Token::Atom("a1".into()));
        assert_eq!(tokens[2], Token::Quoted("al\"ice".into()));
        assert_eq!(tokens[3], Token::Literal(b"secret".to_vec()));
        assert_eq!(
            tokens[4],
            Token::List(vec![Token::Atom("\\Seen".into()), Token::Atom("x".into())])
        );
    }

    #[test]
    fn test_fetch_atom_keeps_brackets() {
        let tokens = tokenize(b"a FETCH 1 (BODY.PEEK[HEADER.FIELDS (FROM TO)]<0.10> UID)").unwrap();
        let items = tokens[3].as_list().unwrap();
        assert_eq!(items[0], Token::Atom("BODY.PEEK[HEADER.FIELDS (FROM TO)]<0.10>".into()));
        assert_eq!(items[1], Token::Atom("UID".into()));
    }

    #[test]
    fn test_unbalanced() {
        assert!(tokenize(b"a (x").is_err());
        assert!(tokenize(b"a x)").is_err());
        assert!(tokenize(b"a {10}\r\nshort").is_err());
    }

    #[test]
    fn test_trailing_literal() {
        assert_eq!(trailing_literal(b"a APPEND INBOX {42}\r\n"), Some((42, false)));
        assert_eq!(trailing_literal(b"a APPEND INBOX {42+}\r\n"), Some((42, true)));
        assert_eq!(trailing_literal(b"a NOOP\r\n"), None);
    }

    #[test]
    fn test_parse_uid_commands() {
        let req = parse(b"t1 UID EXPUNGE 143").unwrap();
        assert_eq!(req.tag, "t1");
        assert_eq!(
            req.command,
            Command::Expunge {
                uids: Some("143".parse().unwrap())
            }
        );

        let req = parse(b"t2 uid store 1:* +FLAGS.SILENT (\\Deleted)").unwrap();
        assert!(matches!(
            req.command,
            Command::Store {
                mode: FlagMode::Add,
                silent: true,
                uid: true,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_list_extended() {
        let req = parse(b"t LIST (SUBSCRIBED) \"\" (\"*\") RETURN (CHILDREN)").unwrap();
        assert_eq!(
            req.command,
            Command::List {
                reference: "".into(),
                pattern: "*".into(),
                subscribed_only: true,
                lsub: false,
            }
        );
    }

    #[test]
    fn test_parse_append() {
        let req = parse(b"t APPEND Drafts (\\Draft) \"05-Jan-2024 10:00:00 +0000\" {5}\r\nhello").unwrap();
        match req.command {
            Command::Append {
                mailbox,
                flags,
                date,
                message,
            } => {
                assert_eq!(mailbox, "Drafts");
                assert_eq!(flags, Some(vec!["\\Draft".to_string()]));
                assert!(date.is_some());
                assert_eq!(message, b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_errors_keep_tag() {
        let (tag, err) = parse(b"x9 FOO").unwrap_err();
        assert_eq!(tag.as_deref(), Some("x9"));
        assert_eq!(err, ImapError::UnknownCommand("FOO".into()));
        assert!(parse(b"").is_err());
    }
}
