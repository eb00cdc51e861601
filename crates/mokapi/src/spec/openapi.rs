//! OpenAPI / Swagger documents.

use super::schema::Schema;
use super::{split_url, Info};
use crate::patch::{patch_named, patch_option, patch_replace, Named, Patch};
use crate::sortedmap::SortedMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PORT: u16 = 80;

pub const METHODS: [&str; 8] = ["GET", "PUT", "POST", "DELETE", "OPTIONS", "HEAD", "PATCH", "TRACE"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub openapi: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub swagger: String,
    pub info: Info,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<Server>,
    pub paths: SortedMap<String, PathItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Components {
    pub schemas: SortedMap<String, Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Operation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    pub responses: SortedMap<String, Response>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestBody {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub required: bool,
    pub content: SortedMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub description: String,
    #[serde(skip_serializing_if = "SortedMap::is_empty")]
    pub headers: SortedMap<String, Header>,
    #[serde(skip_serializing_if = "SortedMap::is_empty")]
    pub content: SortedMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Header {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaType {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl Document {
    pub fn schemas(&self) -> Option<&SortedMap<String, Schema>> {
        self.components.as_ref().map(|c| &c.schemas)
    }

    /// Distinct listen addresses of the absolute server URLs, port 80 when
    /// none is declared.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for address in self.servers.iter().filter_map(Server::address) {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        if addresses.is_empty() {
            addresses.push(format!("0.0.0.0:{DEFAULT_PORT}"));
        }
        addresses
    }
}

impl Server {
    /// Listen address for an absolute URL; relative URLs have none.
    pub fn address(&self) -> Option<String> {
        let (scheme, rest) = split_url(&self.url);
        let scheme = scheme?;
        let host = rest.split('/').next().unwrap_or("");
        let port = match host.rsplit_once(':') {
            Some((_, port)) if !port.ends_with(']') => port.parse::<u16>().ok()?,
            _ if scheme.eq_ignore_ascii_case("https") => 443,
            _ => DEFAULT_PORT,
        };
        Some(format!("0.0.0.0:{port}"))
    }

    /// Path prefix of the URL without a trailing slash.
    pub fn base_path(&self) -> &str {
        let (scheme, rest) = split_url(&self.url);
        let path = match scheme {
            Some(_) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
            None => rest,
        };
        path.trim_end_matches('/')
    }
}

impl PathItem {
    pub fn operation(&self, method: &str) -> Option<&Operation> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => self.get.as_ref(),
            "PUT" => self.put.as_ref(),
            "POST" => self.post.as_ref(),
            "DELETE" => self.delete.as_ref(),
            "OPTIONS" => self.options.as_ref(),
            "HEAD" => self.head.as_ref(),
            "PATCH" => self.patch.as_ref(),
            "TRACE" => self.trace.as_ref(),
            _ => None,
        }
    }

    /// Declared operations with their upper-case method name.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &Operation)> {
        METHODS
            .iter()
            .filter_map(move |m| self.operation(m).map(|op| (*m, op)))
    }
}

impl Operation {
    /// First 2xx response, falling back to `default`.
    pub fn success_response(&self) -> Option<(u16, &Response)> {
        self.responses
            .iter()
            .filter_map(|(code, r)| code.parse::<u16>().ok().map(|c| (c, r)))
            .find(|(c, _)| (200..300).contains(c))
            .or_else(|| self.responses.get("default").map(|r| (200, r)))
    }
}

// ============================================================================
// Patch
// ============================================================================

impl Patch for Document {
    fn patch(&mut self, other: &Self) {
        self.openapi.patch(&other.openapi);
        self.swagger.patch(&other.swagger);
        self.info.patch(&other.info);
        patch_named(&mut self.servers, &other.servers);
        self.paths.patch(&other.paths);
        patch_option(&mut self.components, &other.components);
    }
}

impl Named for Server {
    fn name(&self) -> &str {
        &self.url
    }
}

impl Patch for Server {
    fn patch(&mut self, other: &Self) {
        self.description.patch(&other.description);
    }
}

impl Patch for Components {
    fn patch(&mut self, other: &Self) {
        self.schemas.patch(&other.schemas);
    }
}

impl Patch for PathItem {
    fn patch(&mut self, other: &Self) {
        self.summary.patch(&other.summary);
        self.description.patch(&other.description);
        patch_option(&mut self.get, &other.get);
        patch_option(&mut self.put, &other.put);
        patch_option(&mut self.post, &other.post);
        patch_option(&mut self.delete, &other.delete);
        patch_option(&mut self.options, &other.options);
        patch_option(&mut self.head, &other.head);
        patch_option(&mut self.patch, &other.patch);
        patch_option(&mut self.trace, &other.trace);
        patch_named(&mut self.parameters, &other.parameters);
    }
}

impl Patch for Operation {
    fn patch(&mut self, other: &Self) {
        self.operation_id.patch(&other.operation_id);
        self.summary.patch(&other.summary);
        self.description.patch(&other.description);
        crate::patch::patch_set(&mut self.tags, &other.tags);
        patch_named(&mut self.parameters, &other.parameters);
        patch_option(&mut self.request_body, &other.request_body);
        self.responses.patch(&other.responses);
    }
}

impl Named for Parameter {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Patch for Parameter {
    fn patch(&mut self, other: &Self) {
        self.location.patch(&other.location);
        self.required = other.required;
        patch_option(&mut self.schema, &other.schema);
    }
}

impl Patch for RequestBody {
    fn patch(&mut self, other: &Self) {
        self.description.patch(&other.description);
        self.required = other.required;
        self.content.patch(&other.content);
    }
}

impl Patch for Response {
    fn patch(&mut self, other: &Self) {
        self.description.patch(&other.description);
        self.headers.patch(&other.headers);
        self.content.patch(&other.content);
    }
}

impl Patch for Header {
    fn patch(&mut self, other: &Self) {
        self.description.patch(&other.description);
        patch_option(&mut self.schema, &other.schema);
    }
}

impl Patch for MediaType {
    fn patch(&mut self, other: &Self) {
        patch_option(&mut self.schema, &other.schema);
        patch_replace(&mut self.example, &other.example);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r#"
openapi: 3.0.0
info:
  title: Swagger Petstore
  version: 1.0.0
servers:
  - url: http://localhost:18080
paths:
  /pet/{petId}:
    get:
      operationId: getPetById
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/Pet'
        '404':
          description: not found
components:
  schemas:
    Pet:
      type: object
      properties:
        id: { type: integer }
"#;

    #[test]
    fn test_decode_petstore() {
        let doc: Document = serde_yaml::from_str(PETSTORE).unwrap();
        assert_eq!(doc.info.name(), "Swagger Petstore");
        let item = doc.paths.get("/pet/{petId}").unwrap();
        let op = item.operation("get").unwrap();
        let (status, res) = op.success_response().unwrap();
        assert_eq!(status, 200);
        assert!(res.content.contains_key("application/json"));
        assert!(doc.schemas().unwrap().contains_key("Pet"));
    }

    #[test]
    fn test_patch_adds_operation_and_keeps_existing() {
        let mut doc: Document = serde_yaml::from_str(PETSTORE).unwrap();
        let other: Document = serde_yaml::from_str(
            r#"
openapi: 3.0.0
info: { title: Swagger Petstore, description: patched }
paths:
  /pet/{petId}:
    delete:
      responses:
        '204': { description: deleted }
  /store: {}
"#,
        )
        .unwrap();
        doc.patch(&other);
        let item = doc.paths.get("/pet/{petId}").unwrap();
        assert!(item.get.is_some());
        assert!(item.delete.is_some());
        assert_eq!(doc.paths.keys().collect::<Vec<_>>(), vec!["/pet/{petId}", "/store"]);
        assert_eq!(doc.info.description, "patched");
        assert_eq!(doc.info.version, "1.0.0");
    }

    #[test]
    fn test_server_address_and_base_path() {
        let server = |url: &str| Server {
            url: url.to_string(),
            ..Default::default()
        };
        assert_eq!(server("http://localhost:18080/v1/").address().as_deref(), Some("0.0.0.0:18080"));
        assert_eq!(server("http://localhost:18080/v1/").base_path(), "/v1");
        assert_eq!(server("https://api.mokapi.io").address().as_deref(), Some("0.0.0.0:443"));
        assert_eq!(server("https://api.mokapi.io").base_path(), "");
        assert_eq!(server("/api").address(), None);
        assert_eq!(server("/api").base_path(), "/api");

        let doc: Document = serde_yaml::from_str(PETSTORE).unwrap();
        assert_eq!(doc.addresses(), vec!["0.0.0.0:18080".to_string()]);
        assert_eq!(Document::default().addresses(), vec!["0.0.0.0:80".to_string()]);
    }

    #[test]
    fn test_operations_iterates_declared_methods() {
        let doc: Document = serde_yaml::from_str(PETSTORE).unwrap();
        let item = doc.paths.get("/pet/{petId}").unwrap();
        let methods: Vec<_> = item.operations().map(|(m, _)| m).collect();
        assert_eq!(methods, vec!["GET"]);
    }
}
