//! LDAP directory configuration.

use super::Info;
use crate::patch::{patch_replace, Patch};
use crate::sortedmap::SortedMap;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PORT: u16 = 389;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub ldap: String,
    pub info: Info,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Server>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_domain_naming_context: String,
    pub entries: SortedMap<String, Entry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entry {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dn: String,
    #[serde(deserialize_with = "attribute_values")]
    pub attributes: SortedMap<String, Vec<String>>,
}

fn attribute_values<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SortedMap<String, Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    let raw: SortedMap<String, Raw> = SortedMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            Raw::One(s) => (k, vec![s]),
            Raw::Many(v) => (k, v),
        })
        .collect())
}

impl Config {
    pub fn address(&self) -> String {
        let host = self.server.as_ref().map(|s| s.address.as_str()).unwrap_or("");
        super::listen_address(host, DEFAULT_PORT)
    }

    /// Entries with their DN filled in from the map key when omitted.
    pub fn normalized_entries(&self) -> SortedMap<String, Entry> {
        self.entries
            .iter()
            .map(|(key, e)| {
                let mut e = e.clone();
                if e.dn.is_empty() {
                    e.dn = key.clone();
                }
                (e.dn.to_ascii_lowercase(), e)
            })
            .collect()
    }
}

impl Entry {
    pub fn attribute(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

impl Patch for Config {
    fn patch(&mut self, other: &Self) {
        self.ldap.patch(&other.ldap);
        self.info.patch(&other.info);
        patch_replace(&mut self.server, &other.server);
        self.root_domain_naming_context
            .patch(&other.root_domain_naming_context);
        self.entries.patch(&other.entries);
    }
}

impl Patch for Entry {
    fn patch(&mut self, other: &Self) {
        self.dn.patch(&other.dn);
        for (k, v) in other.attributes.iter() {
            self.attributes.set(k.clone(), v.clone());
        }
    }
}
