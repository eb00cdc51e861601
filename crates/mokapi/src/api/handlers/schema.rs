//! Example generation and validation for ad-hoc schemas.

use crate::api::types::{build_response, json_response, ok, ApiError, ApiResult};
use crate::spec::schema::{format_errors, Schema, ValidationError};
use base64::Engine;
use hyper::StatusCode;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleRequest {
    /// Root element name for XML output.
    #[serde(default)]
    pub name: Option<String>,
    pub schema: Schema,
    #[serde(default)]
    pub content_types: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    pub content_type: String,
    /// Base64 of the encoded example.
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub schema: Schema,
    pub data: Value,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidationFailure {
    message: String,
    errors: Vec<ValidationError>,
}

/// GET /api/schema/example
pub fn handle_example(body: &[u8]) -> ApiResult {
    let request: ExampleRequest = serde_json::from_slice(body)?;
    let value = request.schema.example(&mut StdRng::from_entropy());

    let content_types = if request.content_types.is_empty() {
        vec!["application/json".to_string()]
    } else {
        request.content_types
    };
    let root = request.name.as_deref().unwrap_or("data");

    let examples = content_types
        .into_iter()
        .map(|ct| {
            let encoded = encode(&value, &ct, root)?;
            Ok(Example {
                value: base64::engine::general_purpose::STANDARD.encode(encoded),
                content_type: ct,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    ok(&examples)
}

/// GET /api/schema/validate
pub fn handle_validate(body: &[u8]) -> ApiResult {
    let request: ValidateRequest = serde_json::from_slice(body)?;
    let data = match (&request.data, request.content_type.as_deref()) {
        (Value::String(raw), Some(ct)) if ct.contains("json") => serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("data is not valid JSON: {e}")))?,
        (data, _) => data.clone(),
    };

    match request.schema.validate(&data) {
        Ok(()) => Ok(build_response(StatusCode::NO_CONTENT, "")),
        Err(errors) => Ok(json_response(
            StatusCode::BAD_REQUEST,
            &ValidationFailure {
                message: format_errors(&errors),
                errors,
            },
        )),
    }
}

fn encode(value: &Value, content_type: &str, root: &str) -> Result<Vec<u8>, ApiError> {
    let media = content_type.split(';').next().unwrap_or_default().trim();
    if media.ends_with("json") {
        return Ok(value.to_string().into_bytes());
    }
    if media.ends_with("xml") {
        let mut out = String::new();
        write_xml(&mut out, root, value);
        return Ok(out.into_bytes());
    }
    if media.starts_with("text/") {
        return Ok(match value {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        });
    }
    Err(ApiError::BadRequest(format!("unsupported content type {content_type}")))
}

fn write_xml(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Null => {
            out.push('<');
            out.push_str(name);
            out.push_str("/>");
        }
        Value::Array(items) => {
            for item in items {
                write_xml(out, name, item);
            }
        }
        Value::Object(fields) => {
            out.push_str(&format!("<{name}>"));
            for (k, v) in fields {
                write_xml(out, k, v);
            }
            out.push_str(&format!("</{name}>"));
        }
        Value::String(s) => out.push_str(&format!("<{name}>{}</{name}>", escape(s))),
        other => out.push_str(&format!("<{name}>{other}</{name}>")),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
