//! Header and trailer metadata.
//!
//! [`Metadata`] is an insertion-ordered string map. Keys are normalized to
//! ASCII lowercase, as gRPC metadata keys are case-insensitive on the wire.
//!
//! [`MetadataArg`] is what the metadata APIs accept. It separates a valid
//! mapping from an absent argument and from an argument that is not a mapping
//! at all; invalid arguments are ignored rather than raised.
//!
//! # Example
//!
//! ```
//! use grpcware::protocol::{Metadata, MetadataArg};
//! use serde_json::json;
//!
//! let mut md = Metadata::new();
//! md.insert("Foo", "bar");
//! assert_eq!(md.get("foo"), Some("bar"));
//!
//! assert!(MetadataArg::from(json!({ "biz": "baz" })).is_valid());
//! assert!(MetadataArg::from(json!(1)).is_invalid());
//! ```

use serde_json::Value;

/// Insertion-ordered string map used for headers and trailers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. An existing key keeps its position and gets the new value.
    ///
    /// Returns the previous value for the key, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = normalize_key(key.into());
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a value by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(idx).1)
    }

    /// Merge every entry of `other` into this map.
    pub fn merge(&mut self, other: Metadata) {
        for (k, v) in other.entries {
            self.insert(k, v);
        }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Build a map from a JSON object.
    ///
    /// Strings are taken as-is, numbers and booleans are stringified. Nested
    /// objects, arrays and nulls cannot be carried as metadata and are skipped.
    /// Returns `None` when `value` is not an object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut md = Metadata::new();

        for (key, value) in object {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    tracing::debug!("Skipping non-scalar metadata value for key {}", key);
                    continue;
                }
            };
            md.insert(key.as_str(), value);
        }

        Some(md)
    }
}

fn normalize_key(key: String) -> String {
    if key.bytes().any(|b| b.is_ascii_uppercase()) {
        key.to_ascii_lowercase()
    } else {
        key
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Metadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for Metadata {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Argument accepted by `send_metadata` and by the end-of-call trailer APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataArg {
    /// No argument supplied.
    Absent,
    /// A valid mapping.
    Map(Metadata),
    /// Something that is not a mapping. Always ignored.
    Invalid,
}

impl MetadataArg {
    /// Whether this is a valid mapping.
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, MetadataArg::Map(_))
    }

    /// Whether this argument is not a mapping.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(self, MetadataArg::Invalid)
    }

    /// The mapping, if it is valid and non-empty.
    ///
    /// Empty mappings count as "no argument" for the override rules.
    pub fn into_non_empty(self) -> Option<Metadata> {
        match self {
            MetadataArg::Map(md) if !md.is_empty() => Some(md),
            _ => None,
        }
    }
}

impl Default for MetadataArg {
    fn default() -> Self {
        MetadataArg::Absent
    }
}

impl From<()> for MetadataArg {
    fn from(_: ()) -> Self {
        MetadataArg::Absent
    }
}

impl From<Metadata> for MetadataArg {
    fn from(md: Metadata) -> Self {
        MetadataArg::Map(md)
    }
}

impl From<Option<Metadata>> for MetadataArg {
    fn from(md: Option<Metadata>) -> Self {
        md.map_or(MetadataArg::Absent, MetadataArg::Map)
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for MetadataArg
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        MetadataArg::Map(Metadata::from(pairs))
    }
}

impl From<Value> for MetadataArg {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => MetadataArg::Absent,
            Value::Object(ref object) => match Metadata::from_json(&value) {
                // Entries present but none usable: not a mapping of headers.
                Some(md) if md.is_empty() && !object.is_empty() => MetadataArg::Invalid,
                Some(md) => MetadataArg::Map(md),
                None => MetadataArg::Invalid,
            },
            _ => MetadataArg::Invalid,
        }
    }
}
