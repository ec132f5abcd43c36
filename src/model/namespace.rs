//! Insertion-ordered, string-keyed container with tolerant lookup.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An ordered mapping from names to values.
///
/// Lookup of an unknown key yields `None`; callers branch on presence.
/// Serializes as a map, preserving insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Namespace<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Namespace<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. An existing key keeps its position and gets the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for Namespace<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut ns = Self::new();
        for (k, v) in iter {
            ns.insert(k, v);
        }
        ns
    }
}

impl<T: Serialize> Serialize for Namespace<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Namespace<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamespaceVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for NamespaceVisitor<T> {
            type Value = Namespace<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut ns = Namespace::new();
                while let Some((k, v)) = access.next_entry::<String, T>()? {
                    ns.insert(k, v);
                }
                Ok(ns)
            }
        }

        deserializer.deserialize_map(NamespaceVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_none() {
        let ns: Namespace<u32> = [("a", 1)].into_iter().collect();
        assert_eq!(ns.get("a"), Some(&1));
        assert_eq!(ns.get("b"), None);
        assert!(!ns.contains("b"));
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut ns = Namespace::new();
        ns.insert("zeta", 1);
        ns.insert("alpha", 2);
        ns.insert("mu", 3);
        ns.insert("zeta", 4);

        assert_eq!(ns.keys().collect::<Vec<_>>(), ["zeta", "alpha", "mu"]);
        assert_eq!(ns.get("zeta"), Some(&4));
        assert_eq!(ns.len(), 3);
    }

    #[test]
    fn serde_preserves_order() {
        let json = r#"{"test-other":1,"dev-clean":2,"dev-other":3}"#;
        let ns: Namespace<u32> = serde_json::from_str(json).unwrap();
        assert_eq!(
            ns.keys().collect::<Vec<_>>(),
            ["test-other", "dev-clean", "dev-other"]
        );
        assert_eq!(serde_json::to_string(&ns).unwrap(), json);
    }
}
