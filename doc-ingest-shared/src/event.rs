//! Events and their metadata headers.
//!
//! An [`Event`] is one unit of ingested data: a byte body plus an ordered
//! mapping of string headers. Container splitting derives child events that
//! inherit the parent's headers with record-specific overrides.

use bytes::Bytes;
use thiserror::Error;

/// Well-known header keys used across the pipeline.
pub mod keys {
    /// Declared content type of the event body.
    pub const CONTENT_TYPE: &str = "content.type";
    /// Explicit document id override.
    pub const ID: &str = "id";
    /// Name of the resource the event was read from (file name, target URI).
    pub const RESOURCE_NAME: &str = "resource.name";
    /// Record identifier assigned by the container format.
    pub const RECORD_ID: &str = "warc.record.id";
    /// Record type declared by the container format.
    pub const RECORD_TYPE: &str = "warc.type";
    /// Byte offset of the record within its container.
    pub const RECORD_OFFSET: &str = "record.offset";
    /// Comma-separated target collection names (header routing).
    pub const COLLECTIONS: &str = "collections";
}

/// The event body was already consumed by an earlier pipeline stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event body already consumed")]
pub struct BodyConsumed;

/// Ordered string-to-string metadata map.
///
/// Insertion order is preserved and meaningful: derived headers are written
/// parent-first, then overridden in place, so iterating a child's headers
/// replays the parent's layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up a header value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header with the given key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy these headers and apply record-specific overrides.
    pub fn derive_with<I, K, V>(&self, overrides: I) -> Headers
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut child = self.clone();
        for (key, value) in overrides {
            child.insert(key, value);
        }
        child
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// One unit of ingested data flowing through the pipeline.
///
/// The body carries streaming semantics: it can be taken exactly once per
/// event instance. Headers are cheap to clone and are copied when child
/// events are derived.
#[derive(Debug)]
pub struct Event {
    headers: Headers,
    body: Option<Bytes>,
}

impl Event {
    /// Create a new event from a body and headers.
    pub fn new(body: Bytes, headers: Headers) -> Self {
        Self {
            headers,
            body: Some(body),
        }
    }

    /// Read access to the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Inspect the body without consuming it (e.g. for content sniffing).
    ///
    /// Returns `None` once the body has been taken.
    pub fn peek_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Consume the body. A second call is a usage error.
    pub fn take_body(&mut self) -> Result<Bytes, BodyConsumed> {
        self.body.take().ok_or(BodyConsumed)
    }

    /// Derive a child event: parent headers plus record-specific overrides.
    pub fn derive_child<I, K, V>(&self, body: Bytes, overrides: I) -> Event
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Event {
            headers: self.headers.derive_with(overrides),
            body: Some(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_preserve_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("b", "2");
        headers.insert("a", "1");
        headers.insert("c", "3");

        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_headers_replace_keeps_position() {
        let mut headers = Headers::new();
        headers.insert("a", "1");
        headers.insert("b", "2");
        headers.insert("a", "override");

        let entries: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(entries, vec![("a", "override"), ("b", "2")]);
    }

    #[test]
    fn test_derive_with_overrides() {
        let mut parent = Headers::new();
        parent.insert("shared", "parent");
        parent.insert("kept", "yes");

        let child = parent.derive_with([("shared", "child"), ("extra", "new")]);

        assert_eq!(child.get("shared"), Some("child"));
        assert_eq!(child.get("kept"), Some("yes"));
        assert_eq!(child.get("extra"), Some("new"));
        assert_eq!(parent.get("shared"), Some("parent"));
    }

    #[test]
    fn test_body_consumed_once() {
        let mut event = Event::new(Bytes::from_static(b"payload"), Headers::new());

        assert!(event.peek_body().is_some());
        let body = event.take_body().unwrap();
        assert_eq!(&body[..], b"payload");

        assert!(event.peek_body().is_none());
        assert_eq!(event.take_body(), Err(BodyConsumed));
    }

    #[test]
    fn test_derive_child_inherits_headers() {
        let mut headers = Headers::new();
        headers.insert(keys::RESOURCE_NAME, "sample.warc");
        let parent = Event::new(Bytes::from_static(b"container"), headers);

        let child = parent.derive_child(
            Bytes::from_static(b"record"),
            [(keys::CONTENT_TYPE, "text/html")],
        );

        assert_eq!(child.headers().get(keys::RESOURCE_NAME), Some("sample.warc"));
        assert_eq!(child.headers().get(keys::CONTENT_TYPE), Some("text/html"));
    }
}
