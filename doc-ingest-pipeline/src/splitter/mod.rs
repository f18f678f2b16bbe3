//! Container splitter.
//!
//! Expands a container event into a lazy sequence of per-record child
//! events. Non-container events pass through as a single-element sequence.

mod warc;

pub use warc::WarcSplitter;

use doc_ingest_shared::{event::keys, Event};

use crate::errors::ContainerError;

/// Content types treated as WARC containers.
const WARC_CONTENT_TYPES: &[&str] = &["application/warc", "application/warc-record"];

/// A lazy, finite, non-restartable sequence of child events.
///
/// Records are read on demand; the stream is fused and never restarts.
/// Framing errors surface as items so siblings parsed before the damage are
/// unaffected.
pub enum EventStream {
    /// A non-container event, yielded once.
    Single(Option<Event>),
    /// Records read lazily from a WARC container.
    Warc(WarcSplitter),
}

impl Iterator for EventStream {
    type Item = Result<Event, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EventStream::Single(slot) => slot.take().map(Ok),
            EventStream::Warc(splitter) => splitter.next(),
        }
    }
}

/// Split an event into its constituent records.
///
/// Container detection uses the declared `content.type` header, falling back
/// to the `WARC/` magic at the start of the body. Non-container events yield
/// exactly one child: the event itself, headers and body preserved.
pub fn split(mut event: Event) -> Result<EventStream, ContainerError> {
    if is_warc(&event) {
        let body = event.take_body()?;
        let parent = event.headers().clone();
        return Ok(EventStream::Warc(WarcSplitter::new(body, parent)));
    }
    Ok(EventStream::Single(Some(event)))
}

fn is_warc(event: &Event) -> bool {
    if let Some(declared) = event.headers().get(keys::CONTENT_TYPE) {
        let tag = declared.split(';').next().unwrap_or(declared).trim();
        if WARC_CONTENT_TYPES.contains(&tag) {
            return true;
        }
    }
    event
        .peek_body()
        .map(|body| body.starts_with(b"WARC/"))
        .unwrap_or(false)
}
