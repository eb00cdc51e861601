//! RFC 5322 message parsing.
//!
//! Parsing is lenient: anything that is not understood is kept as raw bytes
//! so IMAP clients can still fetch it unchanged.

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
}

impl Address {
    pub fn new(address: &str) -> Self {
        Self {
            name: None,
            address: address.to_string(),
        }
    }

    /// Parses `Name <local@domain>`, `<local@domain>` or a bare address.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match (s.rfind('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let address = s[open + 1..close].trim().to_string();
                let name = s[..open].trim().trim_matches('"').trim();
                Some(Self {
                    name: (!name.is_empty()).then(|| decode_words(name)),
                    address,
                })
            }
            _ => Some(Self::new(s)),
        }
    }

    /// Splits a comma separated address list, honouring quotes and angle
    /// brackets.
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut list = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut angle = false;
        for c in s.chars() {
            match c {
                '"' => quoted = !quoted,
                '<' if !quoted => angle = true,
                '>' if !quoted => angle = false,
                ',' if !quoted && !angle => {
                    list.extend(Self::parse(&current));
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        list.extend(Self::parse(&current));
        list
    }

    pub fn local_part(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map(|(l, _)| l)
            .unwrap_or(&self.address)
    }

    pub fn domain(&self) -> &str {
        self.address.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub media_type: String,
    pub sub_type: String,
    pub params: Vec<(String, String)>,
}

impl Default for ContentType {
    fn default() -> Self {
        Self {
            media_type: "text".to_string(),
            sub_type: "plain".to_string(),
            params: vec![("charset".to_string(), "us-ascii".to_string())],
        }
    }
}

impl ContentType {
    pub fn parse(value: &str) -> Self {
        let (mime, params) = parse_params(value);
        let Some((media_type, sub_type)) = mime.split_once('/') else {
            return Self::default();
        };
        Self {
            media_type: media_type.trim().to_ascii_lowercase(),
            sub_type: sub_type.trim().to_ascii_lowercase(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn mime(&self) -> String {
        format!("{}/{}", self.media_type, self.sub_type)
    }
}

/// `Content-Disposition` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub kind: String,
    pub params: Vec<(String, String)>,
}

impl Disposition {
    pub fn filename(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("filename"))
            .map(|(_, v)| v.as_str())
    }
}

/// One MIME entity. A non-multipart message is a single part.
#[derive(Debug, Clone)]
pub struct Part {
    pub headers: Vec<Header>,
    /// Header block including the terminating empty line.
    pub header_raw: Bytes,
    pub body_raw: Bytes,
    pub content_type: ContentType,
    pub encoding: String,
    pub parts: Vec<Part>,
}

impl Part {
    pub fn parse(raw: Bytes) -> Self {
        let split = header_end(&raw);
        let header_raw = raw.slice(..split);
        let body_raw = raw.slice(split..);
        let headers = parse_headers(&header_raw);

        let content_type = find_header(&headers, "Content-Type")
            .map(ContentType::parse)
            .unwrap_or_default();
        let encoding = find_header(&headers, "Content-Transfer-Encoding")
            .map(|e| e.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "7bit".to_string());

        let parts = match (content_type.media_type.as_str(), content_type.param("boundary")) {
            ("multipart", Some(boundary)) => split_multipart(&body_raw, boundary)
                .into_iter()
                .map(Part::parse)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            headers,
            header_raw,
            body_raw,
            content_type,
            encoding,
            parts,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.media_type == "multipart"
    }

    pub fn disposition(&self) -> Option<Disposition> {
        let value = self.header("Content-Disposition")?;
        let (kind, params) = parse_params(value);
        Some(Disposition {
            kind: kind.trim().to_ascii_lowercase(),
            params,
        })
    }

    pub fn content_id(&self) -> Option<&str> {
        self.header("Content-ID").map(str::trim)
    }

    pub fn description(&self) -> Option<&str> {
        self.header("Content-Description").map(str::trim)
    }

    pub fn size(&self) -> usize {
        self.body_raw.len()
    }

    pub fn lines(&self) -> usize {
        self.body_raw.iter().filter(|b| **b == b'\n').count()
    }

    /// Body with the transfer encoding removed.
    pub fn decoded(&self) -> Vec<u8> {
        match self.encoding.as_str() {
            "base64" => {
                let compact: Vec<u8> = self
                    .body_raw
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(&compact)
                    .unwrap_or_else(|_| self.body_raw.to_vec())
            }
            "quoted-printable" => decode_quoted_printable(&self.body_raw),
            _ => self.body_raw.to_vec(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.decoded()).into_owned()
    }

    /// Resolves an IMAP part path like `[1, 2]`. A non-multipart entity is
    /// its own part 1.
    pub fn find(&self, path: &[u32]) -> Option<&Part> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let index = (*first as usize).checked_sub(1)?;
        if self.is_multipart() {
            self.parts.get(index)?.find(rest)
        } else if index == 0 {
            self.find(rest)
        } else {
            None
        }
    }

    fn first_text(&self, sub_type: &str) -> Option<&Part> {
        if self.is_multipart() {
            return self.parts.iter().find_map(|p| p.first_text(sub_type));
        }
        let is_attachment = self
            .disposition()
            .map(|d| d.kind == "attachment")
            .unwrap_or(false);
        (self.content_type.media_type == "text" && self.content_type.sub_type == sub_type && !is_attachment)
            .then_some(self)
    }

    fn collect_attachments<'a>(&'a self, out: &mut Vec<&'a Part>) {
        if self.is_multipart() {
            for p in &self.parts {
                p.collect_attachments(out);
            }
        } else if let Some(d) = self.disposition() {
            if d.kind == "attachment" || (d.kind == "inline" && self.content_type.media_type != "text") {
                out.push(self);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// A parsed message together with its raw bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub raw: Bytes,
    pub root: Part,
    pub from: Vec<Address>,
    pub sender: Option<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub message_id: String,
    pub in_reply_to: String,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,
}

impl Message {
    pub fn parse(raw: impl Into<Bytes>) -> Self {
        let raw = raw.into();
        let root = Part::parse(raw.clone());
        let addresses = |name: &str| root.header(name).map(Address::parse_list).unwrap_or_default();
        Self {
            from: addresses("From"),
            sender: root.header("Sender").and_then(Address::parse),
            reply_to: addresses("Reply-To"),
            to: addresses("To"),
            cc: addresses("Cc"),
            bcc: addresses("Bcc"),
            message_id: root.header("Message-ID").unwrap_or_default().trim().to_string(),
            in_reply_to: root.header("In-Reply-To").unwrap_or_default().trim().to_string(),
            subject: root.header("Subject").map(decode_words).unwrap_or_default(),
            date: root
                .header("Date")
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok()),
            raw,
            root,
        }
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.root.header(name)
    }

    /// Plain text body, falling back to the HTML body.
    pub fn body(&self) -> String {
        self.root
            .first_text("plain")
            .or_else(|| self.root.first_text("html"))
            .map(Part::text)
            .unwrap_or_default()
    }

    pub fn html(&self) -> Option<String> {
        self.root.first_text("html").map(Part::text)
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        let mut parts = Vec::new();
        self.root.collect_attachments(&mut parts);
        parts
            .into_iter()
            .map(|p| Attachment {
                name: p
                    .disposition()
                    .and_then(|d| d.filename().map(str::to_string))
                    .or_else(|| p.content_type.param("name").map(str::to_string))
                    .unwrap_or_default(),
                content_type: p.content_type.mime(),
                size: p.decoded().len(),
                content_id: p.content_id().map(|id| id.trim_matches(['<', '>']).to_string()),
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let mut v = json!({
            "from": self.from,
            "to": self.to,
            "subject": self.subject,
            "messageId": self.message_id,
            "contentType": self.root.content_type.mime(),
            "body": self.body(),
            "size": self.size(),
        });
        if !self.cc.is_empty() {
            v["cc"] = json!(self.cc);
        }
        if !self.bcc.is_empty() {
            v["bcc"] = json!(self.bcc);
        }
        if let Some(date) = self.date {
            v["date"] = json!(date.to_rfc3339());
        }
        if let Some(html) = self.html() {
            v["html"] = json!(html);
        }
        let attachments = self.attachments();
        if !attachments.is_empty() {
            v["attachments"] = json!(attachments);
        }
        v
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

fn header_end(raw: &[u8]) -> usize {
    if raw.starts_with(b"\r\n") {
        return 2;
    }
    if raw.starts_with(b"\n") {
        return 1;
    }
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    }
}

fn parse_headers(raw: &[u8]) -> Vec<Header> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<Header> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(last) = headers.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push(Header {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }
    headers
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Splits `value; key=val; key="val"` into the leading value and its
/// parameters.
fn parse_params(value: &str) -> (String, Vec<(String, String)>) {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    let mut iter = segments.into_iter();
    let head = iter.next().unwrap_or_default().trim().to_string();
    let params = iter
        .filter_map(|s| {
            let (k, v) = s.split_once('=')?;
            Some((k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string()))
        })
        .collect();
    (head, params)
}

fn split_multipart(body: &Bytes, boundary: &str) -> Vec<Bytes> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|p| pos + p)
            .unwrap_or(body.len());
        let line = &body[pos..line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(|b| b.is_ascii_whitespace()) {
                if let Some(s) = start {
                    let mut end = pos;
                    if end > s && body[end - 1] == b'\n' {
                        end -= 1;
                        if end > s && body[end - 1] == b'\r' {
                            end -= 1;
                        }
                    }
                    parts.push(body.slice(s..end));
                }
                if closing {
                    break;
                }
                start = Some((line_end + 1).min(body.len()));
            }
        }
        pos = line_end + 1;
    }
    parts
}

pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'=' {
            if data[i + 1..].starts_with(b"\r\n") {
                i += 3;
                continue;
            }
            if data[i + 1..].starts_with(b"\n") {
                i += 2;
                continue;
            }
            if i + 2 < data.len() {
                if let Ok(byte) = u8::from_str_radix(&String::from_utf8_lossy(&data[i + 1..i + 3]), 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

/// Decodes RFC 2047 encoded words (`=?charset?B?...?=`).
pub fn decode_words(s: &str) -> String {
    let mut out = String::new();
    let mut rest = s;
    let mut last_was_word = false;
    while let Some(start) = rest.find("=?") {
        let Some(decoded_len) = decode_word(&rest[start..]) else {
            out.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            last_was_word = false;
            continue;
        };
        let (text, len) = decoded_len;
        let between = &rest[..start];
        // whitespace between adjacent encoded words is dropped
        if !(last_was_word && between.trim().is_empty()) {
            out.push_str(between);
        }
        out.push_str(&text);
        rest = &rest[start + len..];
        last_was_word = true;
    }
    out.push_str(rest);
    out
}

fn decode_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (_charset, inner) = inner.split_once('?')?;
    let (encoding, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let text = &inner[..end];
    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => base64::engine::general_purpose::STANDARD.decode(text).ok()?,
        "Q" => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        _ => return None,
    };
    let len = s.len() - inner.len() + end + 2;
    Some((String::from_utf8_lossy(&bytes).into_owned(), len))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: Alice <alice@foo.bar>\r\n\
To: bob@mokapi.io, \"Carol, C\" <carol@mokapi.io>\r\n\
Subject: =?UTF-8?B?SGVsbG8gV29ybGQ=?=\r\n\
Date: Mon, 02 Jan 2006 15:04:05 +0100\r\n\
Message-ID: <1@foo.bar>\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
caf=C3=A9\r\n\
--XYZ\r\n\
Content-Type: image/png; name=\"a.png\"\r\n\
Content-Disposition: attachment; filename=\"a.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw==\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_headers_and_addresses() {
        let m = Message::parse(MULTIPART.as_bytes().to_vec());
        assert_eq!(m.from[0].name.as_deref(), Some("Alice"));
        assert_eq!(m.from[0].address, "alice@foo.bar");
        assert_eq!(m.to.len(), 2);
        assert_eq!(m.to[1].name.as_deref(), Some("Carol, C"));
        assert_eq!(m.subject, "Hello World");
        assert_eq!(m.message_id, "<1@foo.bar>");
        assert!(m.date.is_some());
    }

    #[test]
    fn test_multipart_body_and_attachment() {
        let m = Message::parse(MULTIPART.as_bytes().to_vec());
        assert_eq!(m.root.parts.len(), 2);
        assert_eq!(m.body(), "café");
        let attachments = m.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "a.png");
        assert_eq!(attachments[0].content_type, "image/png");
        assert_eq!(attachments[0].size, 4);
    }

    #[test]
    fn test_find_part() {
        let m = Message::parse(MULTIPART.as_bytes().to_vec());
        assert_eq!(m.root.find(&[2]).unwrap().content_type.sub_type, "png");
        assert!(m.root.find(&[3]).is_none());

        let simple = Message::parse(&b"Subject: x\r\n\r\nhello"[..]);
        assert_eq!(&simple.root.find(&[1]).unwrap().body_raw[..], b"hello");
    }

    #[test]
    fn test_plain_message_defaults() {
        let m = Message::parse(&b"Subject: hi\r\n folded\r\n\r\nbody\r\n"[..]);
        assert_eq!(m.subject, "hi folded");
        assert_eq!(m.root.content_type.mime(), "text/plain");
        assert_eq!(m.body(), "body\r\n");
        assert_eq!(m.root.lines(), 1);
    }

    #[test]
    fn test_decode_words_q_encoding() {
        assert_eq!(decode_words("=?iso-8859-1?Q?a_b?= =?utf-8?Q?c?="), "a bc");
        assert_eq!(decode_words("plain"), "plain");
        assert_eq!(decode_words("=?broken"), "=?broken");
    }
}
