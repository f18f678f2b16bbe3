//! Lazy WARC record reader.
//!
//! Reads records strictly in file order, on demand, from an in-memory
//! buffer; child bodies are zero-copy slices of the container. Each child
//! inherits the parent headers with record-specific overrides.
//!
//! Corruption policy: a malformed record header emits one error and the
//! reader resynchronizes at the next `WARC/` magic following a CRLF. A body
//! that overruns the remaining input makes the next boundary unlocatable,
//! so the stream terminates early after one error; remaining bytes are
//! reported as lost, never retried.

use bytes::Bytes;
use tracing::{debug, warn};

use doc_ingest_shared::{event::keys, Event, Headers};

use crate::errors::ContainerError;

const CRLF: &[u8] = b"\r\n";
const WARC_MAGIC: &[u8] = b"WARC/";

/// Header fields parsed from one WARC record block.
#[derive(Debug, Default)]
struct RecordHeader {
    warc_type: Option<String>,
    record_id: Option<String>,
    target_uri: Option<String>,
    content_type: Option<String>,
    content_length: Option<u64>,
}

/// Lazy iterator over the records of a WARC container.
pub struct WarcSplitter {
    buf: Bytes,
    pos: usize,
    parent: Headers,
    finished: bool,
}

impl WarcSplitter {
    pub(crate) fn new(buf: Bytes, parent: Headers) -> Self {
        Self {
            buf,
            pos: 0,
            parent,
            finished: false,
        }
    }

    /// Scan forward for the next `WARC/` magic after a CRLF. Returns whether
    /// a resynchronization point was found.
    fn resync(&mut self) -> bool {
        const BOUNDARY: &[u8] = b"\r\nWARC/";

        let hay = &self.buf[self.pos..];
        if let Some(idx) = find(hay, BOUNDARY) {
            self.pos += idx + CRLF.len();
            debug!(offset = self.pos, "Resynchronized at next record boundary");
            true
        } else {
            self.finished = true;
            false
        }
    }

    /// Read one CRLF-terminated line, advancing the cursor past it.
    fn read_line(&mut self) -> Option<&[u8]> {
        let rest = &self.buf[self.pos..];
        let end = find(rest, CRLF)?;
        let line = &self.buf[self.pos..self.pos + end];
        self.pos += end + CRLF.len();
        Some(line)
    }

    fn malformed(&mut self, offset: usize, reason: impl Into<String>) -> ContainerError {
        let err = ContainerError::MalformedHeader {
            offset: offset as u64,
            reason: reason.into(),
        };
        warn!(error = %err, "Malformed record header");
        if !self.resync() {
            debug!("No further record boundary; stream ends");
        }
        err
    }

    fn next_record(&mut self) -> Option<Result<Event, ContainerError>> {
        // Skip inter-record blank lines.
        while self.buf[self.pos..].starts_with(CRLF) {
            self.pos += CRLF.len();
        }
        if self.pos >= self.buf.len() {
            self.finished = true;
            return None;
        }

        let record_offset = self.pos;

        match self.read_line() {
            Some(line) if line.starts_with(WARC_MAGIC) => {}
            _ => {
                // Step past the damaged version line so resync does not
                // land on the same boundary again.
                self.pos = (record_offset + 1).min(self.buf.len());
                return Some(Err(self.malformed(record_offset, "missing WARC version line")));
            }
        }

        let mut header = RecordHeader::default();
        loop {
            let line = match self.read_line() {
                Some(line) => line.to_vec(),
                None => {
                    return Some(Err(
                        self.malformed(record_offset, "unterminated record header block")
                    ));
                }
            };
            if line.is_empty() {
                break;
            }
            let text = match std::str::from_utf8(&line) {
                Ok(t) => t,
                Err(_) => {
                    return Some(Err(
                        self.malformed(record_offset, "record header is not valid UTF-8")
                    ));
                }
            };
            let Some((name, value)) = text.split_once(':') else {
                return Some(Err(self.malformed(
                    record_offset,
                    format!("header line without separator: {:?}", text),
                )));
            };
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "warc-type" => header.warc_type = Some(value.to_string()),
                "warc-record-id" => {
                    header.record_id =
                        Some(value.trim_start_matches('<').trim_end_matches('>').to_string());
                }
                "warc-target-uri" => header.target_uri = Some(value.to_string()),
                "content-type" => header.content_type = Some(value.to_string()),
                "content-length" => match value.parse::<u64>() {
                    Ok(len) => header.content_length = Some(len),
                    Err(_) => {
                        return Some(Err(self.malformed(
                            record_offset,
                            format!("invalid Content-Length: {:?}", value),
                        )));
                    }
                },
                _ => {}
            }
        }

        let Some(declared) = header.content_length else {
            return Some(Err(self.malformed(record_offset, "missing Content-Length")));
        };

        let body_start = self.pos;
        let available = (self.buf.len() - body_start) as u64;
        if declared > available {
            // The next boundary cannot be trusted; stop here.
            self.finished = true;
            let err = ContainerError::TruncatedBody {
                offset: record_offset as u64,
                declared,
                available,
            };
            warn!(error = %err, "Record body overruns container; terminating early");
            return Some(Err(err));
        }

        let body_end = body_start + declared as usize;
        let raw_body = self.buf.slice(body_start..body_end);
        self.pos = body_end;

        let (body, content_type) = unwrap_http_payload(raw_body, header.content_type.as_deref());

        let record_id = header
            .record_id
            .unwrap_or_else(|| format!("record-{}", record_offset));

        let mut overrides: Vec<(&str, String)> = vec![
            (keys::RECORD_ID, record_id),
            (keys::RECORD_OFFSET, record_offset.to_string()),
        ];
        if let Some(warc_type) = header.warc_type {
            overrides.push((keys::RECORD_TYPE, warc_type));
        }
        if let Some(uri) = header.target_uri {
            overrides.push((keys::RESOURCE_NAME, uri));
        }
        if let Some(ct) = content_type {
            overrides.push((keys::CONTENT_TYPE, ct));
        }

        let headers = self.parent.derive_with(overrides);
        Some(Ok(Event::new(body, headers)))
    }
}

impl Iterator for WarcSplitter {
    type Item = Result<Event, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.next_record()
    }
}

/// For `application/http` payloads, strip the HTTP envelope: the entity body
/// becomes the child body and the HTTP `Content-Type` becomes the declared
/// type. Anything else passes through with the record's own content type.
fn unwrap_http_payload(body: Bytes, record_type: Option<&str>) -> (Bytes, Option<String>) {
    let is_http = record_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim() == "application/http")
        .unwrap_or(false);
    if !is_http {
        return (body, record_type.map(|s| s.to_string()));
    }

    let Some(blank) = find(&body, b"\r\n\r\n") else {
        // No envelope terminator; pass the payload through unchanged.
        return (body, record_type.map(|s| s.to_string()));
    };

    let mut entity_type = None;
    if let Ok(head) = std::str::from_utf8(&body[..blank]) {
        for line in head.lines().skip(1) {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-type") {
                    entity_type = Some(value.trim().to_string());
                    break;
                }
            }
        }
    }

    let entity = body.slice(blank + 4..);
    (entity, entity_type)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build one WARC response record wrapping an HTTP payload.
    pub(crate) fn record(id: &str, uri: &str, payload_type: &str, payload: &[u8]) -> Vec<u8> {
        let http = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            payload_type,
            payload.len()
        );
        let mut body = http.into_bytes();
        body.extend_from_slice(payload);

        let mut out = format!(
            "WARC/1.0\r\n\
             WARC-Type: response\r\n\
             WARC-Record-ID: <urn:uuid:{}>\r\n\
             WARC-Target-URI: {}\r\n\
             Content-Type: application/http; msgtype=response\r\n\
             Content-Length: {}\r\n\r\n",
            id,
            uri,
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(&body);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    /// Build a WARC resource record with a direct (non-HTTP) payload.
    pub(crate) fn resource_record(id: &str, payload_type: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\n\
             WARC-Type: resource\r\n\
             WARC-Record-ID: <urn:uuid:{}>\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\r\n",
            id,
            payload_type,
            payload.len()
        )
        .into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    pub(crate) fn container(records: &[Vec<u8>]) -> Bytes {
        let mut out = Vec::new();
        for r in records {
            out.extend_from_slice(r);
        }
        Bytes::from(out)
    }

    fn parent() -> Headers {
        let mut headers = Headers::new();
        headers.insert(keys::RESOURCE_NAME, "sample.warc");
        headers.insert("source", "test");
        headers
    }

    #[test]
    fn test_yields_records_in_file_order() {
        let buf = container(&[
            record("a", "http://example.com/1", "text/html", b"<html>one</html>"),
            record("b", "http://example.com/2", "text/html", b"<html>two</html>"),
            record("c", "http://example.com/3", "text/plain", b"three"),
        ]);
        let mut splitter = WarcSplitter::new(buf, parent());

        let ids: Vec<String> = std::iter::from_fn(|| splitter.next())
            .map(|r| r.unwrap().headers().get(keys::RECORD_ID).unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["urn:uuid:a", "urn:uuid:b", "urn:uuid:c"]);
    }

    #[test]
    fn test_child_inherits_parent_and_overrides() {
        let buf = container(&[record(
            "a",
            "http://example.com/page",
            "text/html",
            b"<html>x</html>",
        )]);
        let mut splitter = WarcSplitter::new(buf, parent());

        let mut child = splitter.next().unwrap().unwrap();
        // Inherited key the record does not override.
        assert_eq!(child.headers().get("source"), Some("test"));
        // Record-specific overrides.
        assert_eq!(
            child.headers().get(keys::RESOURCE_NAME),
            Some("http://example.com/page")
        );
        assert_eq!(child.headers().get(keys::CONTENT_TYPE), Some("text/html"));
        assert_eq!(child.headers().get(keys::RECORD_TYPE), Some("response"));
        assert!(child.headers().get(keys::RECORD_OFFSET).is_some());
        // HTTP envelope stripped.
        assert_eq!(child.take_body().unwrap(), Bytes::from_static(b"<html>x</html>"));
    }

    #[test]
    fn test_resource_record_passes_payload_through() {
        let buf = container(&[resource_record("r", "text/plain", b"plain body")]);
        let mut splitter = WarcSplitter::new(buf, parent());

        let mut child = splitter.next().unwrap().unwrap();
        assert_eq!(child.headers().get(keys::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(child.take_body().unwrap(), Bytes::from_static(b"plain body"));
    }

    #[test]
    fn test_malformed_header_resyncs_at_next_record() {
        let mut corrupt = b"WARC/1.0\r\nthis header has no separator\r\n\r\n".to_vec();
        corrupt.extend_from_slice(&record("after", "http://example.com/ok", "text/plain", b"ok"));
        let mut splitter = WarcSplitter::new(Bytes::from(corrupt), parent());

        let first = splitter.next().unwrap();
        assert!(matches!(first, Err(ContainerError::MalformedHeader { .. })));

        let second = splitter.next().unwrap().unwrap();
        assert_eq!(second.headers().get(keys::RECORD_ID), Some("urn:uuid:after"));
        assert!(splitter.next().is_none());
    }

    #[test]
    fn test_truncated_body_terminates_stream() {
        let good = record("ok", "http://example.com/", "text/plain", b"fine");
        let mut truncated =
            b"WARC/1.0\r\nWARC-Type: response\r\nContent-Length: 10000\r\n\r\n".to_vec();
        truncated.extend_from_slice(b"short");

        let buf = container(&[good, truncated]);
        let mut splitter = WarcSplitter::new(buf, parent());

        assert!(splitter.next().unwrap().is_ok());
        let err = splitter.next().unwrap().unwrap_err();
        assert!(matches!(err, ContainerError::TruncatedBody { .. }));
        // Fused: nothing after the unrecoverable error, even if more bytes follow.
        assert!(splitter.next().is_none());
        assert!(splitter.next().is_none());
    }

    #[test]
    fn test_records_before_corruption_are_unaffected() {
        let buf = container(&[
            record("a", "http://example.com/1", "text/plain", b"one"),
            record("b", "http://example.com/2", "text/plain", b"two"),
            {
                let mut bad = b"WARC/1.0\r\nbroken\r\n\r\n".to_vec();
                bad.extend_from_slice(&record("c", "http://example.com/3", "text/plain", b"three"));
                bad
            },
        ]);
        let mut splitter = WarcSplitter::new(buf, parent());

        assert!(splitter.next().unwrap().is_ok());
        assert!(splitter.next().unwrap().is_ok());
        assert!(splitter.next().unwrap().is_err());
        let resumed = splitter.next().unwrap().unwrap();
        assert_eq!(resumed.headers().get(keys::RECORD_ID), Some("urn:uuid:c"));
        assert!(splitter.next().is_none());
    }

    #[test]
    fn test_missing_content_length_is_malformed() {
        let buf = Bytes::from_static(b"WARC/1.0\r\nWARC-Type: metadata\r\n\r\nbody");
        let mut splitter = WarcSplitter::new(buf, parent());

        let err = splitter.next().unwrap().unwrap_err();
        assert!(matches!(err, ContainerError::MalformedHeader { .. }));
        assert!(splitter.next().is_none());
    }
}
