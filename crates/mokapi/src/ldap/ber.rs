//! Minimal BER codec for LDAPv3 messages.
//!
//! Only definite lengths and single byte identifiers (tag numbers below 31)
//! are supported, which covers every LDAP PDU.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const ENUMERATED: u8 = 0x0a;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

const CONSTRUCTED: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BerError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("indefinite length is not supported")]
    IndefiniteLength,
    #[error("length of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("invalid {0}")]
    Invalid(&'static str),
}

/// One decoded tag-length-value element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: u8,
    pub value: Bytes,
}

impl Element {
    pub fn new(tag: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.tag & CONSTRUCTED != 0
    }

    /// Decodes the contents of a constructed element.
    pub fn children(&self) -> Result<Vec<Element>, BerError> {
        let mut data = self.value.clone();
        let mut out = Vec::new();
        while !data.is_empty() {
            let (element, used) = read(&data)?.ok_or(BerError::Truncated)?;
            data.advance(used);
            out.push(element);
        }
        Ok(out)
    }

    pub fn expect(&self, tag: u8) -> Result<&Self, BerError> {
        if self.tag != tag {
            return Err(BerError::UnexpectedTag {
                expected: tag,
                found: self.tag,
            });
        }
        Ok(self)
    }

    pub fn as_i64(&self) -> Result<i64, BerError> {
        if self.value.is_empty() || self.value.len() > 8 {
            return Err(BerError::Invalid("integer"));
        }
        let negative = self.value[0] & 0x80 != 0;
        let mut v: i64 = if negative { -1 } else { 0 };
        for b in self.value.iter() {
            v = (v << 8) | i64::from(*b);
        }
        Ok(v)
    }

    pub fn as_bool(&self) -> Result<bool, BerError> {
        match self.value.first() {
            Some(b) => Ok(*b != 0),
            None => Err(BerError::Invalid("boolean")),
        }
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.tag);
        put_length(out, self.value.len());
        out.put_slice(&self.value);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.value.len() + 6);
        self.encode(&mut out);
        out.freeze()
    }
}

/// Reads one element from the start of `data`. Returns `None` when more
/// bytes are needed, otherwise the element and the number of bytes used.
pub fn read(data: &[u8]) -> Result<Option<(Element, usize)>, BerError> {
    if data.len() < 2 {
        return Ok(None);
    }
    let tag = data[0];
    let first = data[1];
    let (len, header) = if first < 0x80 {
        (first as usize, 2)
    } else if first == 0x80 {
        return Err(BerError::IndefiniteLength);
    } else {
        let n = (first & 0x7f) as usize;
        if n > 4 {
            return Err(BerError::Invalid("length"));
        }
        if data.len() < 2 + n {
            return Ok(None);
        }
        let len = data[2..2 + n].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + n)
    };
    if len > MAX_MESSAGE_SIZE {
        return Err(BerError::TooLarge(len));
    }
    if data.len() < header + len {
        return Ok(None);
    }
    let value = Bytes::copy_from_slice(&data[header..header + len]);
    Ok(Some((Element { tag, value }, header + len)))
}

fn put_length(out: &mut BytesMut, len: usize) {
    if len < 0x80 {
        out.put_u8(len as u8);
        return;
    }
    let bytes = (len as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.put_u8(0x80 | (4 - skip) as u8);
    out.put_slice(&bytes[skip..]);
}

// ============================================================================
// Builders
// ============================================================================

pub fn integer(tag: u8, v: i64) -> Element {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    Element::new(tag, Bytes::copy_from_slice(&bytes[start..]))
}

pub fn octet_string(s: &str) -> Element {
    Element::new(OCTET_STRING, Bytes::copy_from_slice(s.as_bytes()))
}

pub fn boolean(v: bool) -> Element {
    Element::new(BOOLEAN, Bytes::from_static(if v { &[0xff] } else { &[0x00] }))
}

pub fn constructed(tag: u8, children: &[Element]) -> Element {
    let mut out = BytesMut::new();
    for c in children {
        c.encode(&mut out);
    }
    Element::new(tag, out.freeze())
}

/// Frames LDAP messages on a byte stream.
#[derive(Debug, Default)]
pub struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = Element;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Element>, io::Error> {
        match read(buf) {
            Ok(Some((element, used))) => {
                buf.advance(used);
                Ok(Some(element))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

impl Encoder<Element> for LdapCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Element, dst: &mut BytesMut) -> Result<(), io::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        assert_eq!(integer(INTEGER, 0).value.as_ref(), &[0x00]);
        assert_eq!(integer(INTEGER, 127).value.as_ref(), &[0x7f]);
        assert_eq!(integer(INTEGER, 128).value.as_ref(), &[0x00, 0x80]);
        assert_eq!(integer(INTEGER, -1).value.as_ref(), &[0xff]);
        assert_eq!(integer(INTEGER, -129).value.as_ref(), &[0xff, 0x7f]);
        for v in [0, 1, 127, 128, 255, 256, 65535, -1, -128, -129, i64::MAX, i64::MIN] {
            assert_eq!(integer(INTEGER, v).as_i64().unwrap(), v);
        }
    }

    #[test]
    fn test_long_length() {
        let value = vec![b'a'; 300];
        let e = Element::new(OCTET_STRING, value.clone());
        let bytes = e.to_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x82, 0x01, 0x2c]);
        let (decoded, used) = read(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.value.as_ref(), value.as_slice());
    }

    #[test]
    fn test_codec_waits_for_full_message() {
        // SEQUENCE { INTEGER 1, [APPLICATION 2] }  -- an UnbindRequest
        let full = [0x30, 0x05, 0x02, 0x01, 0x01, 0x42, 0x00];
        let mut codec = LdapCodec;
        let mut buf = BytesMut::from(&full[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[4..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        let children = msg.children().unwrap();
        assert_eq!(children[0].as_i64().unwrap(), 1);
        assert_eq!(children[1].tag, 0x42);
    }

    #[test]
    fn test_rejects_indefinite_length() {
        assert_eq!(read(&[0x30, 0x80, 0x00, 0x00]), Err(BerError::IndefiniteLength));
    }
}
