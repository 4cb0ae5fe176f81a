//! Ordered HTTP header list with case-insensitive name lookup.
//!
//! Names keep the casing they arrived with so that a relayed or replayed
//! message is written back exactly as it was read.

use std::fmt;

use bytes::{BufMut, BytesMut};

/// A case-insensitive, multi-value HTTP header list.
///
/// Preserves insertion order and original name casing, and allows multiple
/// values per header name (RFC 9110 §5.3).
///
/// # Examples
///
/// ```
/// use hcproxy::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Soapaction", "\"getList\"");
/// headers.insert("Set-Cookie", "a=1");
/// headers.insert("Set-Cookie", "b=2");
///
/// assert_eq!(headers.get("SOAPACTION"), Some("\"getList\""));
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header list with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single `name: value` entry
    /// appended at the end.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any value of `name` lists `token` in its
    /// comma-separated elements (e.g. `Connection: keep-alive, close`).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the list contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Writes every entry as a `name: value\r\n` line.
    pub fn write_to(&self, buf: &mut BytesMut) {
        for (name, value) in &self.inner {
            buf.put(name.as_bytes());
            buf.put(&b": "[..]);
            buf.put(value.as_bytes());
            buf.put(&b"\r\n"[..]);
        }
    }

    /// Builds a header list from `httparse` output. Values that are not valid
    /// UTF-8 are decoded lossily.
    pub(crate) fn from_parsed(raw: &[httparse::Header<'_>]) -> Self {
        let mut headers = Self::with_capacity(raw.len());
        for header in raw {
            headers.insert(header.name, String::from_utf8_lossy(header.value));
        }
        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
