//! Key/value metadata attached to events and event stores.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unordered set of key/value pairs. Stores and events always carry
/// `namespace` and usually `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Traits(BTreeMap<String, String>);

impl Traits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.with("namespace", namespace)
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with("name", name)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get("namespace")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// True when every pair of `self` appears in `other`.
    pub fn matches(&self, other: &Traits) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).map(|o| o == v).unwrap_or(false))
    }

    /// True when every pair of `other` appears in `self`.
    pub fn contains(&self, other: &Traits) -> bool {
        other.matches(self)
    }

    /// Build a filter from `key=value` query parameters. Empty values are skipped.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut traits = Traits::new();
        if let Some(q) = query {
            for pair in q.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    let k = urlencoding::decode(k).map(|s| s.into_owned()).unwrap_or_default();
                    let v = urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_default();
                    if !k.is_empty() && !v.is_empty() {
                        traits.insert(k, v);
                    }
                }
            }
        }
        traits
    }
}

impl fmt::Display for Traits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Traits {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Traits(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_is_subset() {
        let filter = Traits::new().with_namespace("http");
        let event = Traits::new().with_namespace("http").with_name("petstore");
        assert!(filter.matches(&event));
        assert!(!event.matches(&filter));
        assert!(event.contains(&filter));
    }

    #[test]
    fn test_value_mismatch() {
        let a = Traits::new().with_namespace("http");
        let b = Traits::new().with_namespace("kafka");
        assert!(!a.matches(&b));
        assert!(!a.contains(&b));
    }

    #[test]
    fn test_from_query() {
        let t = Traits::from_query(Some("namespace=http&name=Swagger%20Petstore&empty="));
        assert_eq!(t.namespace(), Some("http"));
        assert_eq!(t.name(), Some("Swagger Petstore"));
        assert_eq!(t.len(), 2);
    }
}
