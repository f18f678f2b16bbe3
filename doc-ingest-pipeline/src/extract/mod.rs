//! Extraction dispatcher.
//!
//! Routes an event to a content-extraction capability selected by content
//! type: explicit `content.type` header, else magic-byte sniffing, else the
//! configured default. Extractors form an open capability map; new content
//! types register without modifying the dispatcher.

mod builtin;

pub use builtin::{HtmlExtractor, PlainTextExtractor};

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use tracing::{debug, instrument};

use doc_ingest_shared::{event::keys, Event, ExtractedRecord, Headers};

use crate::errors::ExtractionError;

pub(crate) const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// A content-extraction capability: bytes plus hints in, text plus
/// metadata out. Implementations hold no per-document state.
pub trait ContentExtractor: Send + Sync {
    /// Extract text and metadata from a record body.
    fn extract(&self, body: &[u8], headers: &Headers) -> Result<ExtractedRecord, ExtractionError>;
}

/// Open map of content-type tag to extraction capability.
pub struct ExtractorRegistry {
    by_type: HashMap<String, Arc<dyn ContentExtractor>>,
    default: Option<Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    /// An empty registry with no capabilities.
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            default: None,
        }
    }

    /// A registry preloaded with the built-in text and HTML extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("text/plain", Arc::new(PlainTextExtractor));
        let html = Arc::new(HtmlExtractor);
        registry.register("text/html", html.clone());
        registry.register("application/xhtml+xml", html);
        registry
    }

    /// Register a capability for a content-type tag (parameters stripped).
    pub fn register(&mut self, content_type: impl Into<String>, extractor: Arc<dyn ContentExtractor>) {
        self.by_type.insert(content_type.into(), extractor);
    }

    /// Set the fallback capability for unmatched content types.
    pub fn set_default(&mut self, extractor: Arc<dyn ContentExtractor>) {
        self.default = Some(extractor);
    }

    fn resolve(&self, content_type: &str) -> Option<&Arc<dyn ContentExtractor>> {
        if let Some(found) = self.by_type.get(content_type) {
            return Some(found);
        }
        let tag = content_type.split(';').next().unwrap_or(content_type).trim();
        self.by_type.get(tag).or(self.default.as_ref())
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Options applied before dispatch.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Transparently decompress gzip bodies before dispatch.
    pub auto_decompress: bool,
    /// Content type assumed when neither header nor sniffing decides.
    pub default_content_type: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            auto_decompress: true,
            default_content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Dispatches events to extraction capabilities.
///
/// Holds no document state across calls; a failure on one event never
/// affects its siblings.
pub struct ExtractionDispatcher {
    registry: Arc<ExtractorRegistry>,
    options: ExtractOptions,
}

impl ExtractionDispatcher {
    /// Create a dispatcher over a capability registry.
    pub fn new(registry: Arc<ExtractorRegistry>, options: ExtractOptions) -> Self {
        Self { registry, options }
    }

    /// Extract one event, consuming its body.
    ///
    /// The resolved content type is recorded in the returned metadata, and
    /// event headers are merged in for any key the extractor did not set.
    #[instrument(skip(self, event), fields(resource = event.headers().get(keys::RESOURCE_NAME)))]
    pub fn dispatch(&self, event: &mut Event) -> Result<ExtractedRecord, ExtractionError> {
        let mut body = event.take_body().map_err(ExtractionError::from)?;

        if self.options.auto_decompress && body.starts_with(GZIP_MAGIC) {
            body = decompress_gzip(&body)?;
        }

        let content_type = self.resolve_content_type(event.headers(), &body);
        let extractor = self
            .registry
            .resolve(&content_type)
            .ok_or_else(|| ExtractionError::UnsupportedType(content_type.clone()))?;

        debug!(content_type = %content_type, bytes = body.len(), "Dispatching extraction");
        let mut record = extractor.extract(&body, event.headers())?;

        if record.values(keys::CONTENT_TYPE).is_none() {
            record.push_value(keys::CONTENT_TYPE, &content_type);
        }
        for (key, value) in event.headers().iter() {
            if record.values(key).is_none() {
                record.push_value(key, value);
            }
        }
        Ok(record)
    }

    /// The content type this event would dispatch under.
    pub fn resolve_content_type(&self, headers: &Headers, body: &[u8]) -> String {
        if let Some(declared) = headers.get(keys::CONTENT_TYPE) {
            let tag = declared.split(';').next().unwrap_or(declared).trim();
            // A compressed declared type says nothing about the payload we
            // just decompressed; fall through to sniffing.
            if !tag.is_empty() && tag != "application/gzip" && tag != "application/x-gzip" {
                return tag.to_string();
            }
        }
        sniff(body).unwrap_or_else(|| self.options.default_content_type.clone())
    }
}

/// Transparently decompress a gzip (possibly multi-member) body.
pub fn decompress_gzip(body: &[u8]) -> Result<Bytes, ExtractionError> {
    let mut decoder = MultiGzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ExtractionError::Decompression(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Guess a content type from the first bytes of a body.
fn sniff(body: &[u8]) -> Option<String> {
    if body.starts_with(GZIP_MAGIC) {
        return Some("application/gzip".to_string());
    }
    if body.starts_with(b"%PDF") {
        return Some("application/pdf".to_string());
    }
    if body.starts_with(b"WARC/") {
        return Some("application/warc".to_string());
    }
    let head = &body[..body.len().min(512)];
    let trimmed = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &head[i..])
        .unwrap_or(head);
    if starts_with_ignore_case(trimmed, b"<!doctype html") || starts_with_ignore_case(trimmed, b"<html") {
        return Some("text/html".to_string());
    }
    if trimmed.starts_with(b"<?xml") {
        return Some("application/xml".to_string());
    }
    if std::str::from_utf8(head).is_ok() {
        return Some("text/plain".to_string());
    }
    None
}

fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len()
        && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
