//! FETCH data items and their response encoding.

use super::parser::{syntax, ImapError, Token};
use crate::mail::mailbox::Mail;
use crate::mail::message::{Address, Message, Part};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    All,
    Header,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
    Text,
    Mime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub path: Vec<u32>,
    pub specifier: Specifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Flags,
    InternalDate,
    Size,
    Envelope,
    Body,
    BodyStructure,
    Section {
        section: Section,
        /// Raw section text as sent by the client, echoed in the response.
        label: String,
        partial: Option<(usize, usize)>,
        peek: bool,
    },
    /// RFC822, RFC822.HEADER and RFC822.TEXT.
    Rfc822 { name: &'static str, specifier: Specifier },
}

impl FetchItem {
    /// Whether fetching this item marks the message `\Seen`.
    pub fn sets_seen(&self) -> bool {
        match self {
            FetchItem::Section { peek, .. } => !peek,
            FetchItem::Rfc822 { name, .. } => *name != "RFC822.HEADER",
            _ => false,
        }
    }
}

pub fn parse_items(token: &Token) -> Result<Vec<FetchItem>, ImapError> {
    match token {
        Token::Atom(atom) => match atom.to_ascii_uppercase().as_str() {
            "ALL" => Ok(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Size, FetchItem::Envelope]),
            "FAST" => Ok(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Size]),
            "FULL" => Ok(vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Size,
                FetchItem::Envelope,
                FetchItem::Body,
            ]),
            _ => Ok(vec![parse_item(atom)?]),
        },
        Token::List(items) => items
            .iter()
            .map(|t| {
                t.as_atom()
                    .ok_or_else(|| syntax("invalid fetch item"))
                    .and_then(parse_item)
            })
            .collect(),
        _ => Err(syntax("invalid fetch item")),
    }
}

fn parse_item(atom: &str) -> Result<FetchItem, ImapError> {
    let upper = atom.to_ascii_uppercase();
    let item = match upper.as_str() {
        "UID" => FetchItem::Uid,
        "FLAGS" => FetchItem::Flags,
        "INTERNALDATE" => FetchItem::InternalDate,
        "RFC822.SIZE" => FetchItem::Size,
        "ENVELOPE" => FetchItem::Envelope,
        "BODY" => FetchItem::Body,
        "BODYSTRUCTURE" => FetchItem::BodyStructure,
        "RFC822" => FetchItem::Rfc822 {
            name: "RFC822",
            specifier: Specifier::All,
        },
        "RFC822.HEADER" => FetchItem::Rfc822 {
            name: "RFC822.HEADER",
            specifier: Specifier::Header,
        },
        "RFC822.TEXT" => FetchItem::Rfc822 {
            name: "RFC822.TEXT",
            specifier: Specifier::Text,
        },
        _ => {
            let (peek, rest) = if let Some(rest) = upper.strip_prefix("BODY.PEEK[") {
                (true, rest)
            } else if let Some(rest) = upper.strip_prefix("BODY[") {
                (false, rest)
            } else {
                return Err(syntax(format!("unknown fetch item {atom}")));
            };
            let close = rest.rfind(']').ok_or_else(|| syntax("missing ']'"))?;
            let label = &rest[..close];
            let partial = parse_partial(&rest[close + 1..])?;
            FetchItem::Section {
                section: parse_section(label)?,
                label: label.to_string(),
                partial,
                peek,
            }
        }
    };
    Ok(item)
}

fn parse_section(s: &str) -> Result<Section, ImapError> {
    let (head, fields) = match s.find(' ') {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let mut path = Vec::new();
    let mut rest = "";
    for (i, segment) in head.split('.').enumerate() {
        match segment.parse::<u32>() {
            Ok(n) if n > 0 => path.push(n),
            _ if segment.is_empty() && i == 0 => break,
            _ => {
                let offset: usize = head.split('.').take(i).map(|p| p.len() + 1).sum();
                rest = &head[offset..];
                break;
            }
        }
    }
    let field_list = || -> Vec<String> {
        fields
            .unwrap_or("")
            .trim_matches(|c| c == '(' || c == ')')
            .split_whitespace()
            .map(str::to_string)
            .collect()
    };
    let specifier = match rest {
        "" => Specifier::All,
        "HEADER" => Specifier::Header,
        "HEADER.FIELDS" => Specifier::HeaderFields(field_list()),
        "HEADER.FIELDS.NOT" => Specifier::HeaderFieldsNot(field_list()),
        "TEXT" => Specifier::Text,
        "MIME" if !path.is_empty() => Specifier::Mime,
        other => return Err(syntax(format!("invalid section {other}"))),
    };
    Ok(Section { path, specifier })
}

fn parse_partial(s: &str) -> Result<Option<(usize, usize)>, ImapError> {
    if s.is_empty() {
        return Ok(None);
    }
    let inner = s
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| syntax("invalid partial"))?;
    let (offset, len) = inner.split_once('.').ok_or_else(|| syntax("invalid partial"))?;
    match (offset.parse(), len.parse()) {
        (Ok(o), Ok(l)) => Ok(Some((o, l))),
        _ => Err(syntax("invalid partial")),
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Encodes a string as quoted string, or as literal when it cannot be
/// quoted.
pub fn string(s: &str) -> Vec<u8> {
    if s.bytes().any(|b| b == b'\r' || b == b'\n' || b >= 0x80) {
        return literal(s.as_bytes());
    }
    let mut out = Vec::with_capacity(s.len() + 2);
    out.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'"');
    out
}

pub fn nstring(s: Option<&str>) -> Vec<u8> {
    match s {
        Some(s) if !s.is_empty() => string(s),
        _ => b"NIL".to_vec(),
    }
}

pub fn literal(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{{{}}}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

pub fn flag_list(flags: &[String]) -> String {
    format!("({})", flags.join(" "))
}

pub fn internal_date(mail: &Mail) -> String {
    mail.received.format("\"%d-%b-%Y %H:%M:%S %z\"").to_string()
}

/// One `* n FETCH (...)` response line. `uid` forces the UID item for UID
/// commands.
pub fn render(msn: usize, mail: &Mail, items: &[FetchItem], uid: bool) -> Vec<u8> {
    let mut attrs: Vec<Vec<u8>> = Vec::new();
    if uid && !items.contains(&FetchItem::Uid) {
        attrs.push(format!("UID {}", mail.uid).into_bytes());
    }
    for item in items {
        attrs.push(render_item(mail, item));
    }

    let mut out = format!("* {msn} FETCH (").into_bytes();
    out.extend(attrs.join(&b' '));
    out.extend_from_slice(b")\r\n");
    out
}

fn render_item(mail: &Mail, item: &FetchItem) -> Vec<u8> {
    let message = &mail.message;
    match item {
        FetchItem::Uid => format!("UID {}", mail.uid).into_bytes(),
        FetchItem::Flags => format!("FLAGS {}", flag_list(&mail.flags)).into_bytes(),
        FetchItem::InternalDate => format!("INTERNALDATE {}", internal_date(mail)).into_bytes(),
        FetchItem::Size => format!("RFC822.SIZE {}", message.size()).into_bytes(),
        FetchItem::Envelope => {
            let mut out = b"ENVELOPE ".to_vec();
            out.extend(envelope(message));
            out
        }
        FetchItem::Body => {
            let mut out = b"BODY ".to_vec();
            out.extend(body_structure(&message.root, false));
            out
        }
        FetchItem::BodyStructure => {
            let mut out = b"BODYSTRUCTURE ".to_vec();
            out.extend(body_structure(&message.root, true));
            out
        }
        FetchItem::Rfc822 { name, specifier } => {
            let data = section_data(
                message,
                &Section {
                    path: Vec::new(),
                    specifier: specifier.clone(),
                },
            )
            .unwrap_or_default();
            let mut out = format!("{name} ").into_bytes();
            out.extend(literal(&data));
            out
        }
        FetchItem::Section {
            section,
            label,
            partial,
            ..
        } => {
            let data = section_data(message, section).unwrap_or_default();
            let (data, origin) = match partial {
                Some((offset, len)) => {
                    let start = (*offset).min(data.len());
                    let end = start.saturating_add(*len).min(data.len());
                    (data[start..end].to_vec(), format!("<{offset}>"))
                }
                None => (data, String::new()),
            };
            let mut out = format!("BODY[{label}]{origin} ").into_bytes();
            out.extend(literal(&data));
            out
        }
    }
}

fn section_data(message: &Message, section: &Section) -> Option<Vec<u8>> {
    if section.path.is_empty() {
        let root = &message.root;
        return Some(match &section.specifier {
            Specifier::All => message.raw.to_vec(),
            Specifier::Header | Specifier::Mime => root.header_raw.to_vec(),
            Specifier::Text => root.body_raw.to_vec(),
            Specifier::HeaderFields(names) => filter_headers(root, names, true),
            Specifier::HeaderFieldsNot(names) => filter_headers(root, names, false),
        });
    }
    let part = message.root.find(&section.path)?;
    Some(match &section.specifier {
        Specifier::All | Specifier::Text => part.body_raw.to_vec(),
        Specifier::Header | Specifier::Mime => part.header_raw.to_vec(),
        Specifier::HeaderFields(names) => filter_headers(part, names, true),
        Specifier::HeaderFieldsNot(names) => filter_headers(part, names, false),
    })
}

fn filter_headers(part: &Part, names: &[String], include: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for h in &part.headers {
        let listed = names.iter().any(|n| n.eq_ignore_ascii_case(&h.name));
        if listed == include {
            out.extend_from_slice(format!("{}: {}\r\n", h.name, h.value).as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn envelope(message: &Message) -> Vec<u8> {
    let from = &message.from;
    let sender = message.sender.clone().map(|a| vec![a]).unwrap_or_else(|| from.clone());
    let reply_to = if message.reply_to.is_empty() {
        from.clone()
    } else {
        message.reply_to.clone()
    };

    let fields: Vec<Vec<u8>> = vec![
        nstring(message.header("Date")),
        nstring(Some(message.subject.as_str())),
        addresses(from),
        addresses(&sender),
        addresses(&reply_to),
        addresses(&message.to),
        addresses(&message.cc),
        addresses(&message.bcc),
        nstring(Some(message.in_reply_to.as_str())),
        nstring(Some(message.message_id.as_str())),
    ];
    let mut out = b"(".to_vec();
    out.extend(fields.join(&b' '));
    out.push(b')');
    out
}

fn addresses(list: &[Address]) -> Vec<u8> {
    if list.is_empty() {
        return b"NIL".to_vec();
    }
    let mut out = b"(".to_vec();
    for a in list {
        out.push(b'(');
        out.extend(nstring(a.name.as_deref()));
        out.extend_from_slice(b" NIL ");
        out.extend(nstring(Some(a.local_part())));
        out.push(b' ');
        out.extend(nstring(Some(a.domain())));
        out.push(b')');
    }
    out.push(b')');
    out
}

fn params(params: &[(String, String)]) -> Vec<u8> {
    if params.is_empty() {
        return b"NIL".to_vec();
    }
    let encoded: Vec<Vec<u8>> = params
        .iter()
        .flat_map(|(k, v)| [string(&k.to_ascii_uppercase()), string(v)])
        .collect();
    let mut out = b"(".to_vec();
    out.extend(encoded.join(&b' '));
    out.push(b')');
    out
}

/// BODY (`extended == false`) or BODYSTRUCTURE of a part.
pub fn body_structure(part: &Part, extended: bool) -> Vec<u8> {
    let ct = &part.content_type;
    let mut out = b"(".to_vec();
    if part.is_multipart() {
        for child in &part.parts {
            out.extend(body_structure(child, extended));
        }
        out.push(b' ');
        out.extend(string(&ct.sub_type.to_ascii_uppercase()));
        if extended {
            out.push(b' ');
            out.extend(params(&ct.params));
            out.extend_from_slice(b" NIL NIL NIL");
        }
        out.push(b')');
        return out;
    }

    let fields: Vec<Vec<u8>> = vec![
        string(&ct.media_type.to_ascii_uppercase()),
        string(&ct.sub_type.to_ascii_uppercase()),
        params(&ct.params),
        nstring(part.content_id()),
        nstring(part.description()),
        string(&part.encoding.to_ascii_uppercase()),
        part.size().to_string().into_bytes(),
    ];
    out.extend(fields.join(&b' '));
    if ct.media_type == "text" {
        out.extend_from_slice(format!(" {}", part.lines()).as_bytes());
    }
    if extended {
        out.extend_from_slice(b" NIL ");
        match part.disposition() {
            Some(d) => {
                out.push(b'(');
                out.extend(string(&d.kind.to_ascii_uppercase()));
                out.push(b' ');
                out.extend(params(&d.params));
                out.push(b')');
            }
            None => out.extend_from_slice(b"NIL"),
        }
        out.extend_from_slice(b" NIL NIL");
    }
    out.push(b')');
    out
}
