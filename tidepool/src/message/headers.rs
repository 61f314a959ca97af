//! Ordered, case-insensitive message headers.

use serde::{Deserialize, Serialize};

/// Header carrying the logical request method.
pub const METHOD: &str = "method";
/// Header carrying the numeric response status.
pub const STATUS: &str = "status";
/// Header carrying the response status message.
pub const STATUS_MESSAGE: &str = "status-message";
/// Header carrying the payload content type.
pub const CONTENT_TYPE: &str = "content-type";

/// One header value, or several for repeated headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// A single value.
    One(String),
    /// Repeated values, in insertion order.
    Many(Vec<String>),
}

impl HeaderValue {
    /// First value.
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::One(v) => Some(v),
            HeaderValue::Many(vs) => vs.first().map(String::as_str),
        }
    }

    /// All values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice = match self {
            HeaderValue::One(v) => std::slice::from_ref(v),
            HeaderValue::Many(vs) => vs.as_slice(),
        };
        slice.iter().map(String::as_str)
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::One(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::Many(vec![first, value]);
            }
            HeaderValue::Many(vs) => vs.push(value),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::One(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::One(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::Many(values)
    }
}

/// Header map preserving insertion order; names compare case-insensitively
/// and are stored lowercased.
///
/// Serialized as a JSON array of `[name, value]` pairs so ordering survives
/// the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    /// Empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_value(name).and_then(HeaderValue::first)
    }

    /// Full value for `name`.
    pub fn get_value(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    /// All values for `name`; empty when absent.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.get_value(name)
            .map(|v| v.iter().collect())
            .unwrap_or_default()
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace the value for `name`, keeping its position if present.
    pub fn set(&mut self, name: &str, value: impl Into<HeaderValue>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name.to_ascii_lowercase(), value)),
        }
    }

    /// Add a value for `name`, keeping existing values.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value),
            None => self
                .entries
                .push((name.to_ascii_lowercase(), HeaderValue::One(value))),
        }
    }

    /// Remove `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Overlay `other` onto `self`: names in `other` replace ours.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in &other.entries {
            self.set(name, value.clone());
        }
    }

    /// Iterate `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<HeaderValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k.as_ref(), v);
        }
        headers
    }
}
