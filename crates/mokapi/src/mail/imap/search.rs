//! SEARCH criteria.

use super::parser::{syntax, ImapError, Token};
use crate::mail::mailbox::{Mail, ANSWERED, DELETED, DRAFT, FLAGGED, RECENT, SEEN};
use crate::mail::sequence::SequenceSet;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    All,
    /// Flag present (`true`) or absent (`false`).
    Flag(String, bool),
    New,
    Old,
    Header(String, String),
    Body(String),
    Text(String),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Larger(usize),
    Smaller(usize),
    Uid(SequenceSet),
    Sequence(SequenceSet),
    Not(Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
    And(Vec<Criteria>),
}

/// Parses the arguments of SEARCH. Multiple keys are AND-ed.
pub fn parse(tokens: &[Token]) -> Result<Criteria, ImapError> {
    let mut tokens = tokens;
    if tokens
        .first()
        .and_then(Token::as_atom)
        .map(|a| a.eq_ignore_ascii_case("CHARSET"))
        .unwrap_or(false)
    {
        tokens = tokens.get(2..).unwrap_or_default();
    }
    let mut pos = 0;
    let mut keys = Vec::new();
    while pos < tokens.len() {
        keys.push(parse_key(tokens, &mut pos)?);
    }
    Ok(match keys.len() {
        0 => Criteria::All,
        1 => keys.remove(0),
        _ => Criteria::And(keys),
    })
}

fn parse_key(tokens: &[Token], pos: &mut usize) -> Result<Criteria, ImapError> {
    let token = tokens.get(*pos).ok_or_else(|| syntax("missing search key"))?;
    *pos += 1;
    let atom = match token {
        Token::List(inner) => return parse(inner),
        Token::Atom(a) => a.to_ascii_uppercase(),
        _ => return Err(syntax("invalid search key")),
    };

    let mut arg = || -> Result<String, ImapError> {
        let s = tokens
            .get(*pos)
            .and_then(Token::as_string)
            .ok_or_else(|| syntax(format!("{atom} expects an argument")))?;
        *pos += 1;
        Ok(s)
    };

    let flag = |name: &str, set: bool| Criteria::Flag(name.to_string(), set);
    let criteria = match atom.as_str() {
        "ALL" => Criteria::All,
        "ANSWERED" => flag(ANSWERED, true),
        "UNANSWERED" => flag(ANSWERED, false),
        "DELETED" => flag(DELETED, true),
        "UNDELETED" => flag(DELETED, false),
        "DRAFT" => flag(DRAFT, true),
        "UNDRAFT" => flag(DRAFT, false),
        "FLAGGED" => flag(FLAGGED, true),
        "UNFLAGGED" => flag(FLAGGED, false),
        "SEEN" => flag(SEEN, true),
        "UNSEEN" => flag(SEEN, false),
        "RECENT" => flag(RECENT, true),
        "NEW" => Criteria::New,
        "OLD" => Criteria::Old,
        "KEYWORD" => Criteria::Flag(arg()?, true),
        "UNKEYWORD" => Criteria::Flag(arg()?, false),
        "FROM" | "TO" | "CC" | "BCC" | "SUBJECT" => Criteria::Header(atom.clone(), arg()?),
        "HEADER" => {
            let name = arg()?;
            Criteria::Header(name.to_ascii_uppercase(), arg()?)
        }
        "BODY" => Criteria::Body(arg()?),
        "TEXT" => Criteria::Text(arg()?),
        "BEFORE" => Criteria::Before(date(&arg()?)?),
        "ON" => Criteria::On(date(&arg()?)?),
        "SINCE" => Criteria::Since(date(&arg()?)?),
        "SENTBEFORE" => Criteria::SentBefore(date(&arg()?)?),
        "SENTON" => Criteria::SentOn(date(&arg()?)?),
        "SENTSINCE" => Criteria::SentSince(date(&arg()?)?),
        "LARGER" => Criteria::Larger(number(&arg()?)?),
        "SMALLER" => Criteria::Smaller(number(&arg()?)?),
        "UID" => Criteria::Uid(set(&arg()?)?),
        "NOT" => Criteria::Not(Box::new(parse_key(tokens, pos)?)),
        "OR" => {
            let left = parse_key(tokens, pos)?;
            let right = parse_key(tokens, pos)?;
            Criteria::Or(Box::new(left), Box::new(right))
        }
        other => Criteria::Sequence(set(other).map_err(|_| syntax(format!("unknown search key {other}")))?),
    };
    Ok(criteria)
}

/// Parses `1-Feb-1994`.
fn date(s: &str) -> Result<NaiveDate, ImapError> {
    NaiveDate::parse_from_str(s, "%d-%b-%Y").map_err(|_| syntax(format!("invalid date {s}")))
}

fn number(s: &str) -> Result<usize, ImapError> {
    s.parse().map_err(|_| syntax(format!("invalid number {s}")))
}

fn set(s: &str) -> Result<SequenceSet, ImapError> {
    s.parse().map_err(|_| syntax(format!("invalid sequence set {s}")))
}

/// Position of a message in its folder, needed to resolve `*`.
pub struct Context {
    pub msn: usize,
    pub max_msn: usize,
    pub max_uid: u32,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl Criteria {
    pub fn matches(&self, mail: &Mail, ctx: &Context) -> bool {
        let message = &mail.message;
        let received = mail.received.date_naive();
        let sent = message.date.map(|d| d.date_naive());
        match self {
            Criteria::All => true,
            Criteria::Flag(name, set) => mail.has_flag(name) == *set,
            Criteria::New => mail.has_flag(RECENT) && !mail.has_flag(SEEN),
            Criteria::Old => !mail.has_flag(RECENT),
            Criteria::Header(name, value) => {
                let header = match name.as_str() {
                    "SUBJECT" => Some(message.subject.clone()),
                    _ => message.header(name).map(str::to_string),
                };
                match header {
                    // An empty value matches every message with the header.
                    Some(h) => contains_ci(&h, value),
                    None => false,
                }
            }
            Criteria::Body(s) => contains_ci(&String::from_utf8_lossy(&message.root.body_raw), s),
            Criteria::Text(s) => contains_ci(&String::from_utf8_lossy(&message.raw), s),
            Criteria::Before(d) => received < *d,
            Criteria::On(d) => received == *d,
            Criteria::Since(d) => received >= *d,
            Criteria::SentBefore(d) => sent.map(|s| s < *d).unwrap_or(false),
            Criteria::SentOn(d) => sent.map(|s| s == *d).unwrap_or(false),
            Criteria::SentSince(d) => sent.map(|s| s >= *d).unwrap_or(false),
            Criteria::Larger(n) => message.size() > *n,
            Criteria::Smaller(n) => message.size() < *n,
            Criteria::Uid(set) => set.contains(mail.uid, ctx.max_uid),
            Criteria::Sequence(set) => set.contains(ctx.msn as u32, ctx.max_msn as u32),
            Criteria::Not(c) => !c.matches(mail, ctx),
            Criteria::Or(a, b) => a.matches(mail, ctx) || b.matches(mail, ctx),
            Criteria::And(all) => all.iter().all(|c| c.matches(mail, ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::imap::parser::tokenize;
    use crate::mail::message::Message;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn criteria(s: &str) -> Criteria {
        parse(&tokenize(s.as_bytes()).unwrap()).unwrap()
    }

    fn mail(uid: u32, flags: &[&str], subject: &str) -> Mail {
        let raw = format!(
            "From: alice@foo.bar\r\nSubject: {subject}\r\nDate: Tue, 01 Feb 1994 10:00:00 +0000\r\n\r\nbody of {subject}\r\n"
        );
        Mail {
            message: Arc::new(Message::parse(raw.into_bytes())),
            uid,
            flags: flags.iter().map(|f| f.to_string()).collect(),
            received: Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap(),
        }
    }

    fn ctx(msn: usize) -> Context {
        Context {
            msn,
            max_msn: 3,
            max_uid: 30,
        }
    }

    #[test]
    fn test_parse_nested() {
        assert_eq!(
            criteria("OR SEEN (FROM alice NOT DELETED)"),
            Criteria::Or(
                Box::new(Criteria::Flag(SEEN.into(), true)),
                Box::new(Criteria::And(vec![
                    Criteria::Header("FROM".into(), "alice".into()),
                    Criteria::Not(Box::new(Criteria::Flag(DELETED.into(), true))),
                ]))
            )
        );
        assert_eq!(criteria("CHARSET UTF-8 ALL"), Criteria::All);
        assert!(parse(&tokenize(b"BOGUS").unwrap()).is_err());
        assert!(parse(&tokenize(b"SINCE 32-Foo-2000").unwrap()).is_err());
    }

    #[test]
    fn test_flags_and_headers() {
        let seen = mail(10, &[SEEN], "Hello");
        let fresh = mail(20, &[RECENT], "Other");
        assert!(criteria("SEEN").matches(&seen, &ctx(1)));
        assert!(criteria("UNSEEN NEW").matches(&fresh, &ctx(2)));
        assert!(criteria("SUBJECT hello").matches(&seen, &ctx(1)));
        assert!(!criteria("SUBJECT hello").matches(&fresh, &ctx(2)));
        assert!(criteria("HEADER From foo.bar").matches(&fresh, &ctx(2)));
        assert!(criteria("BODY \"of other\"").matches(&fresh, &ctx(2)));
    }

    #[test]
    fn test_dates_sizes_and_sets() {
        let m = mail(30, &[], "x");
        assert!(criteria("SENTON 1-Feb-1994").matches(&m, &ctx(3)));
        assert!(criteria("SENTBEFORE 2-Feb-1994").matches(&m, &ctx(3)));
        assert!(criteria("SINCE 1-Jan-2024 BEFORE 6-Jan-2024").matches(&m, &ctx(3)));
        assert!(!criteria("ON 4-Jan-2024").matches(&m, &ctx(3)));
        assert!(criteria("LARGER 10 SMALLER 10000").matches(&m, &ctx(3)));
        assert!(criteria("UID 25:*").matches(&m, &ctx(3)));
        assert!(criteria("2:*").matches(&m, &ctx(3)));
        assert!(!criteria("1").matches(&m, &ctx(3)));
    }
}
