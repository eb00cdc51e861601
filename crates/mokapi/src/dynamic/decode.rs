//! Type detection and decoding of raw documents.

use super::ConfigData;
use crate::spec::{asyncapi, directory, mail, openapi};
use serde_yaml::Value;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unable to parse document: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("invalid {kind} document: {message}")]
    Invalid { kind: &'static str, message: String },
}

/// Decodes YAML or JSON, detecting the document type from its top-level keys.
///
/// Documents without a recognised key decode to [`ConfigData::Unknown`].
pub fn decode(raw: &[u8]) -> Result<ConfigData, DecodeError> {
    let value: Value = serde_yaml::from_slice(raw)?;
    let Value::Mapping(map) = &value else {
        return Ok(ConfigData::Unknown);
    };
    let has = |key: &str| map.contains_key(key);

    if has("openapi") || has("swagger") {
        let doc: openapi::Document = serde_yaml::from_value(value)?;
        return Ok(ConfigData::OpenApi(Box::new(doc)));
    }
    if has("asyncapi") {
        let mut doc: asyncapi::Document = serde_yaml::from_value(value)?;
        doc.normalize().map_err(|message| DecodeError::Invalid {
            kind: "asyncapi",
            message,
        })?;
        return Ok(ConfigData::AsyncApi(Box::new(doc)));
    }
    if has("mail") {
        let c: mail::Config = serde_yaml::from_value(value)?;
        return Ok(ConfigData::Mail(Box::new(c)));
    }
    if has("ldap") {
        let c: directory::Config = serde_yaml::from_value(value)?;
        return Ok(ConfigData::Directory(Box::new(c)));
    }
    Ok(ConfigData::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_openapi_json() {
        let raw = br#"{"openapi": "3.0.0", "info": {"title": "petstore"}, "paths": {}}"#;
        let data = decode(raw).unwrap();
        assert!(matches!(data, ConfigData::OpenApi(_)));
        assert_eq!(data.name(), Some("petstore"));
    }

    #[test]
    fn test_detects_swagger() {
        let data = decode(b"swagger: '2.0'\ninfo:\n  title: legacy\n").unwrap();
        assert_eq!(data.kind(), "http");
    }

    #[test]
    fn test_detects_each_kind() {
        assert_eq!(decode(b"asyncapi: '3.0.0'\ninfo: {title: a}").unwrap().kind(), "kafka");
        assert_eq!(decode(b"mail: '1.0'\ninfo: {title: m}").unwrap().kind(), "mail");
        assert_eq!(decode(b"ldap: '1.0'\ninfo: {title: l}").unwrap().kind(), "ldap");
    }

    #[test]
    fn test_unknown_document() {
        assert_eq!(decode(b"foo: bar").unwrap(), ConfigData::Unknown);
        assert_eq!(decode(b"- 1\n- 2").unwrap(), ConfigData::Unknown);
    }

    #[test]
    fn test_invalid_regex_fails_mail() {
        let err = decode(b"mail: '1.0'\nrules:\n  - sender: '(['\n").unwrap_err();
        assert!(matches!(err, DecodeError::Syntax(_)));
    }

    #[test]
    fn test_syntax_error() {
        assert!(decode(b"openapi: [").is_err());
    }
}
