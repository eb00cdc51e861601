//! LDAP search filters.

use super::ber::{BerError, Element};
use crate::spec::directory::Entry;
use std::cmp::Ordering;
use std::fmt;

const AND: u8 = 0xa0;
const OR: u8 = 0xa1;
const NOT: u8 = 0xa2;
const EQUALITY: u8 = 0xa3;
const SUBSTRINGS: u8 = 0xa4;
const GREATER_OR_EQUAL: u8 = 0xa5;
const LESS_OR_EQUAL: u8 = 0xa6;
const PRESENT: u8 = 0x87;
const APPROX: u8 = 0xa8;

const SUB_INITIAL: u8 = 0x80;
const SUB_ANY: u8 = 0x81;
const SUB_FINAL: u8 = 0x82;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, String),
    Substrings {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Present(String),
    Approx(String, String),
}

impl Filter {
    pub fn decode(e: &Element) -> Result<Self, BerError> {
        let filter = match e.tag {
            AND => Filter::And(e.children()?.iter().map(Filter::decode).collect::<Result<_, _>>()?),
            OR => Filter::Or(e.children()?.iter().map(Filter::decode).collect::<Result<_, _>>()?),
            NOT => {
                let inner = e.children()?;
                let first = inner.first().ok_or(BerError::Invalid("not filter"))?;
                Filter::Not(Box::new(Filter::decode(first)?))
            }
            EQUALITY | GREATER_OR_EQUAL | LESS_OR_EQUAL | APPROX => {
                let (attribute, value) = assertion(e)?;
                match e.tag {
                    EQUALITY => Filter::Equality(attribute, value),
                    GREATER_OR_EQUAL => Filter::GreaterOrEqual(attribute, value),
                    LESS_OR_EQUAL => Filter::LessOrEqual(attribute, value),
                    _ => Filter::Approx(attribute, value),
                }
            }
            PRESENT => Filter::Present(e.as_string()),
            SUBSTRINGS => {
                let children = e.children()?;
                let [attribute, subs] = children.as_slice() else {
                    return Err(BerError::Invalid("substring filter"));
                };
                let mut initial = None;
                let mut any = Vec::new();
                let mut last = None;
                for s in subs.children()? {
                    match s.tag {
                        SUB_INITIAL => initial = Some(s.as_string()),
                        SUB_ANY => any.push(s.as_string()),
                        SUB_FINAL => last = Some(s.as_string()),
                        _ => return Err(BerError::Invalid("substring choice")),
                    }
                }
                Filter::Substrings {
                    attribute: attribute.as_string(),
                    initial,
                    any,
                    last,
                }
            }
            _ => return Err(BerError::Invalid("filter")),
        };
        Ok(filter)
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        let values = |attribute: &str| -> Vec<String> {
            if attribute.eq_ignore_ascii_case("dn") || attribute.eq_ignore_ascii_case("distinguishedName") {
                return vec![entry.dn.clone()];
            }
            entry.attribute(attribute).cloned().unwrap_or_default()
        };
        match self {
            Filter::And(all) => all.iter().all(|f| f.matches(entry)),
            Filter::Or(any) => any.iter().any(|f| f.matches(entry)),
            Filter::Not(f) => !f.matches(entry),
            Filter::Equality(a, v) | Filter::Approx(a, v) => values(a).iter().any(|x| x.eq_ignore_ascii_case(v)),
            // every entry has an object class, declared or not
            Filter::Present(a) => a.eq_ignore_ascii_case("objectClass") || !values(a).is_empty(),
            Filter::GreaterOrEqual(a, v) => values(a).iter().any(|x| compare(x, v) != Ordering::Less),
            Filter::LessOrEqual(a, v) => values(a).iter().any(|x| compare(x, v) != Ordering::Greater),
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => values(attribute).iter().any(|x| substring_match(x, initial.as_deref(), any, last.as_deref())),
        }
    }
}

fn assertion(e: &Element) -> Result<(String, String), BerError> {
    let children = e.children()?;
    match children.as_slice() {
        [a, v] => Ok((a.as_string(), v.as_string())),
        _ => Err(BerError::Invalid("attribute value assertion")),
    }
}

/// Numeric when both sides are numbers, otherwise case-insensitive.
fn compare(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();
    if let Some(initial) = initial {
        let initial = initial.to_lowercase();
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(&last.to_lowercase()),
        None => true,
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(all) => {
                f.write_str("(&")?;
                for c in all {
                    write!(f, "{c}")?;
                }
                f.write_str(")")
            }
            Filter::Or(any) => {
                f.write_str("(|")?;
                for c in any {
                    write!(f, "{c}")?;
                }
                f.write_str(")")
            }
            Filter::Not(c) => write!(f, "(!{c})"),
            Filter::Equality(a, v) => write!(f, "({a}={v})"),
            Filter::Approx(a, v) => write!(f, "({a}~={v})"),
            Filter::GreaterOrEqual(a, v) => write!(f, "({a}>={v})"),
            Filter::LessOrEqual(a, v) => write!(f, "({a}<={v})"),
            Filter::Present(a) => write!(f, "({a}=*)"),
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({attribute}={}*", initial.as_deref().unwrap_or(""))?;
                for a in any {
                    write!(f, "{a}*")?;
                }
                write!(f, "{})", last.as_deref().unwrap_or(""))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::ber::{constructed, octet_string};

    fn entry() -> Entry {
        serde_yaml::from_str(
            "dn: cn=alice,dc=mokapi,dc=io\nattributes:\n  cn: Alice\n  mail: alice@mokapi.io\n  age: '42'\n  objectClass: [person, top]\n",
        )
        .unwrap()
    }

    fn eq(a: &str, v: &str) -> Element {
        constructed(EQUALITY, &[octet_string(a), octet_string(v)])
    }

    #[test]
    fn test_decode_and_match() {
        let filter = Filter::decode(&constructed(
            AND,
            &[
                eq("objectClass", "person"),
                Element::new(PRESENT, "mail"),
                constructed(NOT, &[eq("cn", "bob")]),
            ],
        ))
        .unwrap();
        assert_eq!(filter.to_string(), "(&(objectClass=person)(mail=*)(!(cn=bob)))");
        assert!(filter.matches(&entry()));
    }

    #[test]
    fn test_substrings() {
        let filter = Filter::decode(&constructed(
            SUBSTRINGS,
            &[
                octet_string("mail"),
                constructed(
                    0x30,
                    &[Element::new(SUB_INITIAL, "ALI"), Element::new(SUB_FINAL, ".io")],
                ),
            ],
        ))
        .unwrap();
        assert_eq!(filter.to_string(), "(mail=ALI*.io)");
        assert!(filter.matches(&entry()));
        assert!(!substring_match("alice", Some("al"), &["x".to_string()], None));
        assert!(substring_match("alice", None, &["li".to_string()], Some("ce")));
    }

    #[test]
    fn test_ordering_filters() {
        let ge = Filter::GreaterOrEqual("age".into(), "40".into());
        let le = Filter::LessOrEqual("age".into(), "9".into());
        assert!(ge.matches(&entry()));
        assert!(!le.matches(&entry()));
        assert!(Filter::Or(vec![le, Filter::Equality("CN".into(), "alice".into())]).matches(&entry()));
    }

    #[test]
    fn test_unknown_filter() {
        assert!(Filter::decode(&Element::new(0xa9, "")).is_err());
    }
}
