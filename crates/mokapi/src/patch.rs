//! Deterministic deep merge of specification fragments.
//!
//! Rules:
//! - non-empty scalar values of the patch overwrite the base, empty ones are ignored
//! - sequences of named entities are merged by name, unknown names are appended
//! - keyed maps are merged by key
//! - compiled regular expressions are replaced wholesale
//!
//! Fragments are applied in ascending order of the base name of their source
//! URL, so the last fragment dominates for equal keys.

use crate::sortedmap::SortedMap;
use std::hash::Hash;

/// Types that can absorb a later fragment.
pub trait Patch {
    fn patch(&mut self, other: &Self);
}

/// Entities merged by identity inside a sequence.
pub trait Named {
    fn name(&self) -> &str;
}

impl Patch for String {
    fn patch(&mut self, other: &Self) {
        if !other.is_empty() {
            *self = other.clone();
        }
    }
}

impl<K, V> Patch for SortedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Patch + Clone,
{
    fn patch(&mut self, other: &Self) {
        for (k, v) in other.iter() {
            match self.get_mut(k) {
                Some(existing) => existing.patch(v),
                None => self.set(k.clone(), v.clone()),
            }
        }
    }
}

/// Recursively patch an optional value, inserting it when the base has none.
pub fn patch_option<T: Patch + Clone>(base: &mut Option<T>, other: &Option<T>) {
    match (base.as_mut(), other) {
        (Some(b), Some(o)) => b.patch(o),
        (None, Some(o)) => *base = Some(o.clone()),
        _ => {}
    }
}

/// Replace an optional value wholesale when the patch carries one.
pub fn patch_replace<T: Clone>(base: &mut Option<T>, other: &Option<T>) {
    if let Some(o) = other {
        *base = Some(o.clone());
    }
}

/// Overwrite a scalar when the patch differs from its zero value.
pub fn patch_scalar<T: Clone + Default + PartialEq>(base: &mut T, other: &T) {
    if *other != T::default() {
        *base = other.clone();
    }
}

/// Patch a flag field. The patch always wins.
pub fn patch_flag(base: &mut bool, other: bool) {
    *base = other;
}

/// Merge sequences of named entities.
pub fn patch_named<T: Named + Patch + Clone>(base: &mut Vec<T>, other: &[T]) {
    for item in other {
        match base.iter_mut().find(|b| b.name() == item.name()) {
            Some(existing) => existing.patch(item),
            None => base.push(item.clone()),
        }
    }
}

/// Union of string sequences, keeping the base order.
pub fn patch_set(base: &mut Vec<String>, other: &[String]) {
    for item in other {
        if !base.contains(item) {
            base.push(item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: String,
        value: String,
        count: i32,
    }

    impl Named for Item {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Patch for Item {
        fn patch(&mut self, other: &Self) {
            self.value.patch(&other.value);
            patch_scalar(&mut self.count, &other.count);
        }
    }

    fn item(name: &str, value: &str, count: i32) -> Item {
        Item {
            name: name.to_string(),
            value: value.to_string(),
            count,
        }
    }

    #[test]
    fn test_empty_string_is_noop() {
        let mut s = "base".to_string();
        s.patch(&String::new());
        assert_eq!(s, "base");
        s.patch(&"patched".to_string());
        assert_eq!(s, "patched");
    }

    #[test]
    fn test_named_sequences_merge_by_name() {
        let mut base = vec![item("a", "1", 1), item("b", "2", 2)];
        patch_named(&mut base, &[item("b", "", 5), item("c", "3", 0)]);
        assert_eq!(base, vec![item("a", "1", 1), item("b", "2", 5), item("c", "3", 0)]);
    }

    #[test]
    fn test_map_patch_inserts_and_recurses() {
        let mut base: SortedMap<String, Item> = SortedMap::new();
        base.set("x".into(), item("x", "old", 1));
        let mut other: SortedMap<String, Item> = SortedMap::new();
        other.set("x".into(), item("x", "new", 0));
        other.set("y".into(), item("y", "v", 2));
        base.patch(&other);
        assert_eq!(base.get("x").unwrap().value, "new");
        assert_eq!(base.get("x").unwrap().count, 1);
        assert!(base.contains_key("y"));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut base = vec![item("a", "1", 1)];
        let patch = vec![item("a", "2", 3), item("b", "x", 1)];
        patch_named(&mut base, &patch);
        let once = base.clone();
        patch_named(&mut base, &patch);
        assert_eq!(base, once);
    }

    #[test]
    fn test_option_patch() {
        let mut base: Option<String> = None;
        patch_option(&mut base, &Some("a".to_string()));
        assert_eq!(base.as_deref(), Some("a"));
        patch_option(&mut base, &None);
        assert_eq!(base.as_deref(), Some("a"));
        patch_replace(&mut base, &Some("b".to_string()));
        assert_eq!(base.as_deref(), Some("b"));
    }
}
