//! LDAPMessage envelope and the protocol operations served.

use super::ber::{self, constructed, integer, octet_string, BerError, Element};
use super::filter::Filter;
use serde::Serialize;
use std::fmt;

pub const BIND_REQUEST: u8 = 0x60;
pub const BIND_RESPONSE: u8 = 0x61;
pub const UNBIND_REQUEST: u8 = 0x42;
pub const SEARCH_REQUEST: u8 = 0x63;
pub const SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const SEARCH_RESULT_DONE: u8 = 0x65;
pub const ABANDON_REQUEST: u8 = 0x50;

const AUTH_SIMPLE: u8 = 0x80;
const AUTH_SASL: u8 = 0xa3;

/// LDAP result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultCode(pub i64);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const AUTH_METHOD_NOT_SUPPORTED: ResultCode = ResultCode(7);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "OperationsError",
            2 => "ProtocolError",
            4 => "SizeLimitExceeded",
            7 => "AuthMethodNotSupported",
            32 => "NoSuchObject",
            49 => "InvalidCredentials",
            53 => "UnwillingToPerform",
            _ => "Other",
        }
    }

    /// Whether the code reports a failed request.
    pub fn is_error(self) -> bool {
        !matches!(self, ResultCode::SUCCESS | ResultCode::SIZE_LIMIT_EXCEEDED)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Simple(String),
    Sasl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub name: String,
    pub auth: Authentication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Bind(BindRequest),
    Search(SearchRequest),
    Unbind,
    Abandon,
    /// Any other operation; answered with `unwillingToPerform`.
    Unsupported(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: i64,
    pub operation: Operation,
}

impl Request {
    pub fn decode(message: &Element) -> Result<Self, BerError> {
        message.expect(ber::SEQUENCE)?;
        let children = message.children()?;
        let (id, op) = match children.as_slice() {
            [id, op, ..] => (id.expect(ber::INTEGER)?.as_i64()?, op),
            _ => return Err(BerError::Invalid("LDAP message")),
        };
        let operation = match op.tag {
            BIND_REQUEST => Operation::Bind(decode_bind(op)?),
            SEARCH_REQUEST => Operation::Search(decode_search(op)?),
            UNBIND_REQUEST => Operation::Unbind,
            ABANDON_REQUEST => Operation::Abandon,
            other => Operation::Unsupported(other),
        };
        Ok(Self { id, operation })
    }
}

fn decode_bind(op: &Element) -> Result<BindRequest, BerError> {
    let fields = op.children()?;
    let [version, name, auth] = fields.as_slice() else {
        return Err(BerError::Invalid("bind request"));
    };
    let auth = match auth.tag {
        AUTH_SIMPLE => Authentication::Simple(auth.as_string()),
        AUTH_SASL => {
            let mechanism = auth.children()?.first().map(Element::as_string).unwrap_or_default();
            Authentication::Sasl(mechanism)
        }
        _ => return Err(BerError::Invalid("authentication choice")),
    };
    Ok(BindRequest {
        version: version.as_i64()?,
        name: name.as_string(),
        auth,
    })
}

fn decode_search(op: &Element) -> Result<SearchRequest, BerError> {
    let fields = op.children()?;
    let [base, scope, _deref, size_limit, time_limit, types_only, filter, attributes] = fields.as_slice() else {
        return Err(BerError::Invalid("search request"));
    };
    let scope = match scope.as_i64()? {
        0 => Scope::BaseObject,
        1 => Scope::SingleLevel,
        2 => Scope::WholeSubtree,
        _ => return Err(BerError::Invalid("search scope")),
    };
    Ok(SearchRequest {
        base: base.as_string(),
        scope,
        size_limit: size_limit.as_i64()?,
        time_limit: time_limit.as_i64()?,
        types_only: types_only.as_bool()?,
        filter: Filter::decode(filter)?,
        attributes: attributes.children()?.iter().map(Element::as_string).collect(),
    })
}

// ============================================================================
// Responses
// ============================================================================

fn envelope(id: i64, op: Element) -> Element {
    constructed(ber::SEQUENCE, &[integer(ber::INTEGER, id), op])
}

/// LDAPResult with the given protocol op tag.
pub fn result(id: i64, tag: u8, code: ResultCode, message: &str) -> Element {
    envelope(
        id,
        constructed(
            tag,
            &[
                integer(ber::ENUMERATED, code.0),
                octet_string(""),
                octet_string(message),
            ],
        ),
    )
}

/// Response op tag answering an unsupported request op.
pub fn response_tag(request_tag: u8) -> u8 {
    (request_tag | 0x20) + 1
}

pub fn search_entry(id: i64, dn: &str, attributes: &[(String, Vec<String>)]) -> Element {
    let attributes: Vec<Element> = attributes
        .iter()
        .map(|(name, values)| {
            let values: Vec<Element> = values.iter().map(|v| octet_string(v)).collect();
            constructed(ber::SEQUENCE, &[octet_string(name), constructed(ber::SET, &values)])
        })
        .collect();
    envelope(
        id,
        constructed(
            SEARCH_RESULT_ENTRY,
            &[octet_string(dn), constructed(ber::SEQUENCE, &attributes)],
        ),
    )
}
