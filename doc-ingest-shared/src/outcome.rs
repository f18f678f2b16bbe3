//! Terminal delivery outcomes.
//!
//! Every event fed to the pipeline is accounted for by exactly one terminal
//! outcome per routed collection. Nothing is silently dropped.

use std::fmt;

/// Terminal state of one document's journey through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// Identifier of the record or document this outcome refers to.
    pub record_id: String,
    /// Target collection, when the failure happened after routing.
    pub collection: Option<String>,
    /// The terminal status.
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    /// A document committed on the first delivery attempt.
    pub fn committed(record_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            collection: Some(collection.into()),
            status: DeliveryStatus::Committed,
        }
    }

    /// A document committed after one or more retries.
    pub fn retried(record_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            collection: Some(collection.into()),
            status: DeliveryStatus::RetriedAndCommitted,
        }
    }

    /// A terminal failure, optionally scoped to a collection.
    pub fn failed(
        record_id: impl Into<String>,
        collection: Option<String>,
        kind: FailureKind,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            collection,
            status: DeliveryStatus::Failed(kind),
        }
    }

    /// Whether the document reached the backend (with or without retries).
    pub fn is_committed(&self) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Committed | DeliveryStatus::RetriedAndCommitted
        )
    }
}

/// The three terminal statuses a document can reach.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryStatus {
    /// Delivered on the first attempt.
    Committed,
    /// Delivered after at least one retry.
    RetriedAndCommitted,
    /// Terminally failed; the kind records what happened.
    Failed(FailureKind),
}

/// What went wrong, with enough detail to reconstruct the failure without
/// re-running extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// Container framing corruption.
    ContainerFormat { offset: u64, reason: String },
    /// Content extraction failed for one record.
    Extraction {
        content_type: Option<String>,
        reason: String,
    },
    /// Field coercion or schema mismatch.
    Mapping {
        field: String,
        value: String,
        reason: String,
    },
    /// Transient delivery errors exhausted the retry ceiling.
    TransientDelivery { attempts: u32, reason: String },
    /// The backend rejected the document; retrying would not help.
    PermanentDelivery { reason: String },
    /// Backpressure retries exhausted before the loader accepted the document.
    Backpressure { reason: String },
    /// The routing policy matched the record to no registered collection.
    Unrouted,
    /// Delivery was cancelled by a shutdown timeout; the document is
    /// eligible for caller-level redelivery.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ContainerFormat { offset, reason } => {
                write!(f, "container format error at offset {}: {}", offset, reason)
            }
            FailureKind::Extraction { content_type, reason } => match content_type {
                Some(ct) => write!(f, "extraction failed for {}: {}", ct, reason),
                None => write!(f, "extraction failed: {}", reason),
            },
            FailureKind::Mapping { field, value, reason } => {
                write!(f, "cannot map field {:?} value {:?}: {}", field, value, reason)
            }
            FailureKind::TransientDelivery { attempts, reason } => {
                write!(f, "delivery failed after {} attempts: {}", attempts, reason)
            }
            FailureKind::PermanentDelivery { reason } => {
                write!(f, "delivery rejected: {}", reason)
            }
            FailureKind::Backpressure { reason } => {
                write!(f, "backpressure retries exhausted: {}", reason)
            }
            FailureKind::Unrouted => f.write_str("record routed to no collection"),
            FailureKind::Cancelled => f.write_str("delivery cancelled during shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_helpers() {
        let ok = DeliveryOutcome::committed("1", "articles");
        assert!(ok.is_committed());

        let retried = DeliveryOutcome::retried("2", "articles");
        assert!(retried.is_committed());

        let failed = DeliveryOutcome::failed(
            "3",
            Some("articles".to_string()),
            FailureKind::PermanentDelivery {
                reason: "schema mismatch".to_string(),
            },
        );
        assert!(!failed.is_committed());
    }

    #[test]
    fn test_failure_kind_names_offending_field() {
        let kind = FailureKind::Mapping {
            field: "price".to_string(),
            value: "not-a-number".to_string(),
            reason: "invalid double".to_string(),
        };
        let rendered = kind.to_string();
        assert!(rendered.contains("price"));
        assert!(rendered.contains("not-a-number"));
    }
}
