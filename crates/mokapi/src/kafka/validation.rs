//! Payload validation against the messages of a channel.

use super::error::KafkaError;
use crate::spec::asyncapi::{Channel, Message};
use crate::spec::schema::{format_errors, Resolver, Schema};
use serde_json::Value;

/// Validates produced records against a channel's messages.
pub struct Validator<'a> {
    channel: &'a Channel,
    default_content_type: &'a str,
    resolver: Resolver<'a>,
}

impl<'a> Validator<'a> {
    pub fn new(channel: &'a Channel, default_content_type: &'a str, resolver: Resolver<'a>) -> Self {
        Self {
            channel,
            default_content_type,
            resolver,
        }
    }

    /// Returns the id of the first message accepting the record. A channel
    /// without messages accepts everything.
    ///
    /// When `content_type` is given only messages declaring that content type
    /// are considered.
    pub fn validate(
        &self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        content_type: Option<&str>,
    ) -> Result<Option<String>, KafkaError> {
        if self.channel.messages.is_empty() {
            return Ok(None);
        }

        let mut key_error = None;
        for (id, message) in self.channel.messages.iter() {
            let ct = message.content_type(self.default_content_type);
            if let Some(wanted) = content_type {
                if !same_media_type(ct, wanted) {
                    continue;
                }
            }
            if let Err(e) = self.check_key(message, key) {
                key_error = Some(e);
                continue;
            }
            if self.check_payload(message, ct, value).is_ok() {
                return Ok(Some(id.clone()));
            }
        }

        if let Some(e) = key_error {
            return Err(KafkaError::InvalidKey(e));
        }
        Err(KafkaError::NoMatchingMessage(display(value)))
    }

    fn check_key(&self, message: &Message, key: Option<&[u8]>) -> Result<(), String> {
        let (Some(schema), Some(key)) = (message.key(), key) else {
            return Ok(());
        };
        let value = serde_json::from_slice::<Value>(key)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(key).into_owned()));
        self.check(schema, &value)
    }

    fn check_payload(&self, message: &Message, content_type: &str, value: Option<&[u8]>) -> Result<(), String> {
        let Some(schema) = message.payload.as_ref() else {
            return Ok(());
        };
        let Some(raw) = value else {
            return self.check(schema, &Value::Null);
        };

        let media = media_type(content_type);
        if media.ends_with("json") {
            let parsed: Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
            self.check(schema, &parsed)
        } else if media.starts_with("text/") {
            let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
            self.check(schema, &Value::String(text.to_string()))
        } else {
            Ok(())
        }
    }

    fn check(&self, schema: &Schema, value: &Value) -> Result<(), String> {
        schema
            .validate_with(value, &self.resolver)
            .map_err(|errors| format_errors(&errors))
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn same_media_type(a: &str, b: &str) -> bool {
    media_type(a) == media_type(b)
}

fn display(value: Option<&[u8]>) -> String {
    match value {
        Some(v) => String::from_utf8_lossy(v).into_owned(),
        None => "null".to_string(),
    }
}
