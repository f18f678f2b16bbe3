//! Pipeline orchestrator.
//!
//! Composes the stages end to end: split the event into records, extract
//! each record, route it, map it per target collection, and hand the mapped
//! documents to the loaders. Errors are isolated per record and per
//! collection, and every record is accounted for with one terminal outcome
//! per routed collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use doc_ingest_backend::{BackendError, CommitOptions};
use doc_ingest_shared::{event::keys, DeliveryOutcome, Event, FailureKind, Headers, MappedDocument};

use crate::errors::{ContainerError, EnqueueRejected, PipelineError, RegistryError};
use crate::extract::{decompress_gzip, ExtractionDispatcher, GZIP_MAGIC};
use crate::loader::{DeliveryTicket, Rejected};
use crate::mapper::{FieldMapper, IdAssigner};
use crate::registry::{CollectionEntry, CollectionRegistry};
use crate::splitter;

/// Orchestrator-level settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Transparently decompress gzip-wrapped containers before splitting.
    pub decompress_containers: bool,
    /// Re-enqueue attempts when a loader signals backpressure.
    pub enqueue_retry_attempts: u32,
    /// Delay between backpressure retries.
    pub enqueue_retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decompress_containers: true,
            enqueue_retry_attempts: 3,
            enqueue_retry_delay: Duration::from_millis(50),
        }
    }
}

/// An outcome we already know, or a ticket that will resolve into one.
enum Slot {
    Ready(DeliveryOutcome),
    Ticket(DeliveryTicket),
}

/// Drives events through the full pipeline.
pub struct PipelineOrchestrator {
    registry: Arc<CollectionRegistry>,
    dispatcher: ExtractionDispatcher,
    mapper: FieldMapper,
    ids: IdAssigner,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        dispatcher: ExtractionDispatcher,
        mapper: FieldMapper,
        ids: IdAssigner,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            mapper,
            ids,
            config,
        }
    }

    /// Process one event to completion.
    ///
    /// Returns a terminal outcome for every record per routed collection, in
    /// record order; a record that routes to no collection still yields one
    /// terminal outcome. Failures become outcomes rather than errors: a
    /// damaged record, a failed extraction, or a rejected document never
    /// aborts its siblings.
    #[instrument(skip(self, event), fields(resource = event.headers().get(keys::RESOURCE_NAME)))]
    pub async fn process(&self, mut event: Event) -> Vec<DeliveryOutcome> {
        let resource = event
            .headers()
            .get(keys::RESOURCE_NAME)
            .unwrap_or("input")
            .to_string();

        if self.config.decompress_containers
            && event
                .peek_body()
                .map(|b| b.starts_with(GZIP_MAGIC))
                .unwrap_or(false)
        {
            match event.take_body().map_err(ContainerError::from) {
                Ok(body) => match decompress_gzip(&body) {
                    Ok(plain) => event = Event::new(plain, event.headers().clone()),
                    Err(err) => {
                        return vec![DeliveryOutcome::failed(
                            resource,
                            None,
                            err.into_failure_kind(Some("application/gzip".to_string())),
                        )];
                    }
                },
                Err(err) => return vec![container_failure(&resource, err)],
            }
        }

        let stream = match splitter::split(event) {
            Ok(stream) => stream,
            Err(err) => return vec![container_failure(&resource, err)],
        };

        let mut slots: Vec<Slot> = Vec::new();
        let mut touched: HashSet<String> = HashSet::new();
        for item in stream {
            match item {
                Ok(mut child) => self.process_record(&mut child, &mut slots, &mut touched).await,
                Err(err) => slots.push(Slot::Ready(container_failure(&resource, err))),
            }
        }

        // Settle every partial batch this event touched before resolving
        // tickets, otherwise small inputs would wait on the linger timer.
        let flushes = touched
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|entry| entry.loader.flush());
        join_all(flushes).await;

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            outcomes.push(match slot {
                Slot::Ready(outcome) => outcome,
                Slot::Ticket(ticket) => ticket.outcome().await,
            });
        }
        outcomes
    }

    async fn process_record(
        &self,
        child: &mut Event,
        slots: &mut Vec<Slot>,
        touched: &mut HashSet<String>,
    ) {
        let record = match self.dispatcher.dispatch(child) {
            Ok(record) => record,
            Err(err) => {
                let content_type = child.headers().get(keys::CONTENT_TYPE).map(str::to_string);
                warn!(error = %err, "Extraction failed for record");
                slots.push(Slot::Ready(DeliveryOutcome::failed(
                    record_label(child.headers()),
                    None,
                    err.into_failure_kind(content_type),
                )));
                return;
            }
        };

        let targets = match self.registry.route(child.headers()) {
            Ok(targets) => targets,
            Err(err) => {
                slots.push(Slot::Ready(DeliveryOutcome::failed(
                    record_label(child.headers()),
                    None,
                    FailureKind::PermanentDelivery {
                        reason: err.to_string(),
                    },
                )));
                return;
            }
        };
        if targets.is_empty() {
            let label = record_label(child.headers());
            debug!(record = %label, "Record routed to no collection");
            slots.push(Slot::Ready(DeliveryOutcome::failed(
                label,
                None,
                FailureKind::Unrouted,
            )));
            return;
        }

        let id = self.ids.assign(child.headers(), &record);

        for entry in targets {
            let collection = entry.descriptor.name.clone();
            let document = match self.mapper.map(&record, &entry.descriptor, id.clone()) {
                Ok(document) => document,
                Err(err) => {
                    slots.push(Slot::Ready(DeliveryOutcome::failed(
                        id.clone(),
                        Some(collection),
                        err.into_failure_kind(),
                    )));
                    continue;
                }
            };
            match self.enqueue_with_backoff(entry, document).await {
                Ok(ticket) => {
                    touched.insert(collection);
                    slots.push(Slot::Ticket(ticket));
                }
                Err(outcome) => slots.push(Slot::Ready(outcome)),
            }
        }
    }

    /// Enqueue with bounded retries on backpressure. A rejection that
    /// survives the retries becomes a terminal outcome.
    async fn enqueue_with_backoff(
        &self,
        entry: &CollectionEntry,
        mut document: MappedDocument,
    ) -> Result<DeliveryTicket, DeliveryOutcome> {
        let collection = entry.descriptor.name.as_str();
        let mut attempt: u32 = 0;
        loop {
            let Rejected {
                document: returned,
                reason,
            } = match entry.loader.enqueue(document).await {
                Ok(ticket) => return Ok(ticket),
                Err(rejected) => rejected,
            };
            match reason {
                EnqueueRejected::Backpressure(signal)
                    if attempt < self.config.enqueue_retry_attempts =>
                {
                    attempt += 1;
                    debug!(
                        collection = %collection,
                        attempt,
                        signal = %signal,
                        "Backpressure on enqueue, backing off"
                    );
                    tokio::time::sleep(self.config.enqueue_retry_delay).await;
                    document = returned;
                }
                EnqueueRejected::Backpressure(signal) => {
                    return Err(DeliveryOutcome::failed(
                        returned.id,
                        Some(collection.to_string()),
                        FailureKind::Backpressure {
                            reason: signal.to_string(),
                        },
                    ));
                }
                reason @ EnqueueRejected::Closed(_) => {
                    return Err(DeliveryOutcome::failed(
                        returned.id,
                        Some(collection.to_string()),
                        FailureKind::PermanentDelivery {
                            reason: reason.to_string(),
                        },
                    ));
                }
            }
        }
    }

    /// Commit every registered collection.
    pub async fn commit_all(&self, options: &CommitOptions) -> Result<(), BackendError> {
        for entry in self.registry.iter() {
            entry.loader.commit(options).await?;
        }
        Ok(())
    }

    /// Delete committed documents matching a query in one collection.
    pub async fn delete_by_query(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<u64, PipelineError> {
        let entry = self
            .registry
            .get(collection)
            .ok_or_else(|| RegistryError::UnknownCollection(collection.to_string()))?;
        Ok(entry.loader.delete_by_query(query).await?)
    }

    /// Drain and close every loader. With a timeout, deliveries still in
    /// flight when it elapses resolve as cancelled.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        for entry in self.registry.iter() {
            let drained = match timeout {
                Some(t) => entry.loader.shutdown_with_timeout(t).await,
                None => entry.loader.shutdown().await,
            };
            outcomes.extend(drained);
        }
        outcomes
    }
}

fn container_failure(resource: &str, err: ContainerError) -> DeliveryOutcome {
    let record_id = format!("{}@{}", resource, err.offset());
    DeliveryOutcome::failed(record_id, None, err.into_failure_kind())
}

fn record_label(headers: &Headers) -> String {
    headers
        .get(keys::RECORD_ID)
        .or_else(|| headers.get(keys::RESOURCE_NAME))
        .unwrap_or("unidentified")
        .to_string()
}
