//! Document loader.
//!
//! Accepts mapped documents for one collection, accumulates them into
//! batches, and delivers each batch to the search backend with bounded
//! exponential retry. Batches are submitted in FIFO order, in-flight batches
//! are capped (excess enqueues are rejected with a backpressure signal), and
//! delivery is at-least-once: a batch whose acknowledgement is lost may be
//! re-sent, so the backend deduplicates by document id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use doc_ingest_backend::{BackendError, CommitOptions, DocumentFailure, SearchBackendClient};
use doc_ingest_shared::{DeliveryOutcome, FailureKind, MappedDocument};

use crate::errors::{BackpressureSignal, EnqueueRejected};

/// Batching, retry, and flow-control settings for one loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Documents per batch before it is sealed and sent.
    pub max_batch_docs: usize,
    /// How long a partial batch may sit before the linger timer seals it.
    /// Zero disables the timer; partial batches then wait for `flush`.
    pub linger: Duration,
    /// Ceiling on concurrently in-flight batches. An enqueue that would seal
    /// a batch past this ceiling is rejected with a backpressure signal; the
    /// open batch still buffers up to `max_batch_docs - 1` documents on top
    /// of this ceiling.
    pub max_in_flight_batches: usize,
    /// Concurrent batch sends. Sends start in seal order regardless.
    pub send_concurrency: usize,
    /// Retries after the first attempt for transient backend errors.
    pub max_retries: u32,
    /// Backoff delay before the first retry; doubles per attempt.
    pub initial_retry_delay: Duration,
    /// Backoff delay ceiling.
    pub max_retry_delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch_docs: 32,
            linger: Duration::from_millis(250),
            max_in_flight_batches: 4,
            send_concurrency: 2,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Lifecycle state of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Accepting documents.
    Open,
    /// Shutdown requested; no new documents, in-flight work finishing.
    Draining,
    /// Fully drained. Terminal.
    Closed,
}

/// Resolves to the terminal outcome of one enqueued document.
pub struct DeliveryTicket {
    record_id: String,
    collection: String,
    rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryTicket {
    /// Wait for the document's terminal outcome.
    pub async fn outcome(self) -> DeliveryOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            // The loader side of the ticket was dropped without resolving,
            // which only happens when delivery was abandoned mid-shutdown.
            Err(_) => DeliveryOutcome::failed(
                self.record_id,
                Some(self.collection),
                FailureKind::Cancelled,
            ),
        }
    }
}

/// An enqueue the loader did not accept. The document is handed back so the
/// caller can retry or account for it.
#[derive(Debug)]
pub struct Rejected {
    pub document: MappedDocument,
    pub reason: EnqueueRejected,
}

struct Pending {
    document: MappedDocument,
    ticket: oneshot::Sender<DeliveryOutcome>,
}

struct Batch {
    docs: Vec<Pending>,
}

struct LoaderInner {
    pending: Vec<Pending>,
    state: LoaderState,
    /// Outcomes recorded since the last drain, in completion order.
    completed: Vec<DeliveryOutcome>,
    /// Bumped whenever a send lands documents on the backend.
    write_epoch: u64,
    /// The write epoch the last commit covered.
    committed_epoch: u64,
}

struct Shared {
    collection: String,
    client: Arc<dyn SearchBackendClient>,
    config: LoaderConfig,
    inner: Mutex<LoaderInner>,
    /// Count of batches currently in flight.
    in_flight: watch::Sender<usize>,
    /// Set once to abandon in-flight deliveries during a timed-out drain.
    cancel: watch::Sender<bool>,
}

/// Per-collection batching loader.
///
/// Construction spawns the dispatch task (and the linger timer when
/// configured), so a tokio runtime must be running.
pub struct DocumentLoader {
    shared: Arc<Shared>,
    batch_tx: mpsc::UnboundedSender<Batch>,
}

impl DocumentLoader {
    /// Create a loader for one collection over a backend client.
    pub fn new(
        collection: impl Into<String>,
        client: Arc<dyn SearchBackendClient>,
        config: LoaderConfig,
    ) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0usize);
        let (cancel, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            collection: collection.into(),
            client,
            config,
            inner: Mutex::new(LoaderInner {
                pending: Vec::new(),
                state: LoaderState::Open,
                completed: Vec::new(),
                write_epoch: 0,
                committed_epoch: 0,
            }),
            in_flight,
            cancel,
        });

        tokio::spawn(dispatch_loop(shared.clone(), batch_rx));
        if !shared.config.linger.is_zero() {
            tokio::spawn(linger_loop(shared.clone(), batch_tx.clone()));
        }

        Arc::new(Self { shared, batch_tx })
    }

    /// The collection this loader delivers to.
    pub fn collection(&self) -> &str {
        &self.shared.collection
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LoaderState {
        self.shared.inner.lock().await.state
    }

    /// Batches currently in flight.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.borrow()
    }

    /// Accept a document for delivery.
    ///
    /// Returns a ticket that resolves to the document's terminal outcome.
    /// An enqueue that would seal a batch while the in-flight ceiling is
    /// reached is rejected with a backpressure signal; an enqueue after
    /// shutdown began is rejected as closed. Rejections hand the document
    /// back to the caller.
    pub async fn enqueue(&self, document: MappedDocument) -> Result<DeliveryTicket, Rejected> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != LoaderState::Open {
            return Err(Rejected {
                reason: EnqueueRejected::Closed(self.shared.collection.clone()),
                document,
            });
        }

        let would_seal = inner.pending.len() + 1 >= self.shared.config.max_batch_docs;
        if would_seal {
            let in_flight = *self.shared.in_flight.borrow();
            if in_flight >= self.shared.config.max_in_flight_batches {
                return Err(Rejected {
                    reason: BackpressureSignal {
                        collection: self.shared.collection.clone(),
                        in_flight,
                        ceiling: self.shared.config.max_in_flight_batches,
                    }
                    .into(),
                    document,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        let ticket = DeliveryTicket {
            record_id: document.id.clone(),
            collection: self.shared.collection.clone(),
            rx,
        };
        inner.pending.push(Pending {
            document,
            ticket: tx,
        });
        if inner.pending.len() >= self.shared.config.max_batch_docs {
            seal(&self.shared, &mut inner, &self.batch_tx);
        }
        Ok(ticket)
    }

    /// Seal any partial batch, wait for all in-flight batches to settle, and
    /// drain the outcomes recorded since the last drain.
    ///
    /// Leaves the loader open. Flushing with nothing pending is a no-op.
    #[instrument(skip(self), fields(collection = %self.shared.collection))]
    pub async fn flush(&self) -> Vec<DeliveryOutcome> {
        {
            let mut inner = self.shared.inner.lock().await;
            seal(&self.shared, &mut inner, &self.batch_tx);
        }
        self.wait_idle().await;
        let mut inner = self.shared.inner.lock().await;
        std::mem::take(&mut inner.completed)
    }

    /// Commit delivered documents on the backend.
    ///
    /// Idempotent: a commit with no writes since the previous commit is
    /// skipped locally and returns `Ok(false)`. Returns `Ok(true)` when a
    /// backend commit was actually issued.
    pub async fn commit(&self, options: &CommitOptions) -> Result<bool, BackendError> {
        let write_epoch = {
            let inner = self.shared.inner.lock().await;
            if inner.write_epoch == inner.committed_epoch {
                debug!(collection = %self.shared.collection, "Skipping commit with no new writes");
                return Ok(false);
            }
            inner.write_epoch
        };

        self.shared
            .client
            .commit(&self.shared.collection, options)
            .await?;

        let mut inner = self.shared.inner.lock().await;
        // Only advance to the epoch this commit observed; writes that landed
        // during the commit still need one of their own.
        if inner.committed_epoch < write_epoch {
            inner.committed_epoch = write_epoch;
        }
        Ok(true)
    }

    /// Delete committed documents matching a query.
    pub async fn delete_by_query(&self, query: &str) -> Result<u64, BackendError> {
        self.shared
            .client
            .delete_by_query(&self.shared.collection, query)
            .await
    }

    /// Drain and close: stop accepting documents, deliver everything pending
    /// and in flight, then return the remaining outcomes.
    pub async fn shutdown(&self) -> Vec<DeliveryOutcome> {
        self.begin_drain().await;
        self.wait_idle().await;
        self.finish_drain().await
    }

    /// Like [`shutdown`](Self::shutdown), but abandons deliveries still in
    /// flight once `timeout` elapses. Abandoned documents resolve to
    /// cancelled outcomes, flagging them for caller-level redelivery.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Vec<DeliveryOutcome> {
        self.begin_drain().await;
        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            info!(
                collection = %self.shared.collection,
                "Drain timed out, cancelling in-flight deliveries"
            );
            let _ = self.shared.cancel.send(true);
            self.wait_idle().await;
        }
        self.finish_drain().await
    }

    async fn begin_drain(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state == LoaderState::Open {
            inner.state = LoaderState::Draining;
            seal(&self.shared, &mut inner, &self.batch_tx);
        }
    }

    async fn finish_drain(&self) -> Vec<DeliveryOutcome> {
        let mut inner = self.shared.inner.lock().await;
        inner.state = LoaderState::Closed;
        std::mem::take(&mut inner.completed)
    }

    async fn wait_idle(&self) {
        let mut rx = self.shared.in_flight.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Seal the pending documents into a batch and hand it to the dispatcher.
/// Must be called with the inner lock held.
fn seal(shared: &Shared, inner: &mut LoaderInner, batch_tx: &mpsc::UnboundedSender<Batch>) {
    if inner.pending.is_empty() {
        return;
    }
    let docs = std::mem::take(&mut inner.pending);
    debug!(
        collection = %shared.collection,
        docs = docs.len(),
        "Sealing batch"
    );
    shared.in_flight.send_modify(|n| *n += 1);
    if let Err(mpsc::error::SendError(batch)) = batch_tx.send(Batch { docs }) {
        // Dispatch task is gone; nothing can deliver this batch anymore.
        shared.in_flight.send_modify(|n| *n -= 1);
        for pending in batch.docs {
            let outcome = DeliveryOutcome::failed(
                pending.document.id.clone(),
                Some(shared.collection.clone()),
                FailureKind::Cancelled,
            );
            inner.completed.push(outcome.clone());
            let _ = pending.ticket.send(outcome);
        }
    }
}

/// Receives sealed batches and sends them with bounded concurrency.
///
/// The permit is acquired before the send task is spawned, so sends start in
/// seal (FIFO) order even when several may run concurrently.
async fn dispatch_loop(shared: Arc<Shared>, mut batch_rx: mpsc::UnboundedReceiver<Batch>) {
    let permits = Arc::new(Semaphore::new(shared.config.send_concurrency));
    while let Some(batch) = batch_rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            send_batch(&shared, batch).await;
            drop(permit);
        });
    }
}

/// Seals lingering partial batches so documents never wait indefinitely for
/// a full batch. Respects the in-flight ceiling; a deferred seal happens on
/// a later tick.
async fn linger_loop(shared: Arc<Shared>, batch_tx: mpsc::UnboundedSender<Batch>) {
    let mut cancel_rx = shared.cancel.subscribe();
    let mut ticker = tokio::time::interval(shared.config.linger);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut inner = shared.inner.lock().await;
                if inner.state == LoaderState::Closed {
                    break;
                }
                if !inner.pending.is_empty()
                    && *shared.in_flight.borrow() < shared.config.max_in_flight_batches
                {
                    seal(&shared, &mut inner, &batch_tx);
                }
            }
            _ = cancelled(&mut cancel_rx) => break,
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender gone without a cancel signal; never resolve.
    std::future::pending::<()>().await
}

async fn send_batch(shared: &Shared, batch: Batch) {
    let docs: Vec<MappedDocument> = batch.docs.iter().map(|p| p.document.clone()).collect();
    let mut cancel_rx = shared.cancel.subscribe();

    let delivery = tokio::select! {
        delivery = deliver_with_retry(shared, &docs) => Some(delivery),
        _ = cancelled(&mut cancel_rx) => None,
    };

    let outcomes = batch_outcomes(shared, &batch, delivery);
    let any_committed = outcomes.iter().any(|o| o.is_committed());
    {
        let mut inner = shared.inner.lock().await;
        if any_committed {
            inner.write_epoch += 1;
        }
        inner.completed.extend(outcomes.iter().cloned());
    }
    for (pending, outcome) in batch.docs.into_iter().zip(outcomes) {
        let _ = pending.ticket.send(outcome);
    }
    shared.in_flight.send_modify(|n| *n -= 1);
}

enum Delivery {
    /// Every document in the batch was accepted.
    Accepted { retried: bool },
    /// Named documents were refused; the rest were accepted.
    PartiallyRejected {
        failures: Vec<DocumentFailure>,
        retried: bool,
    },
    /// Transient errors exhausted the retry ceiling.
    Exhausted { attempts: u32, reason: String },
    /// A permanent error failed the whole batch.
    Permanent { reason: String },
}

async fn deliver_with_retry(shared: &Shared, docs: &[MappedDocument]) -> Delivery {
    let mut delay = shared.config.initial_retry_delay;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match shared.client.add_batch(&shared.collection, docs).await {
            Ok(()) => {
                return Delivery::Accepted {
                    retried: attempt > 1,
                }
            }
            Err(BackendError::Rejected { failures }) => {
                return Delivery::PartiallyRejected {
                    failures,
                    retried: attempt > 1,
                }
            }
            Err(err) if err.is_transient() && attempt <= shared.config.max_retries => {
                warn!(
                    collection = %shared.collection,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient delivery error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(shared.config.max_retry_delay);
            }
            Err(err) if err.is_transient() => {
                return Delivery::Exhausted {
                    attempts: attempt,
                    reason: err.to_string(),
                }
            }
            Err(err) => {
                return Delivery::Permanent {
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn batch_outcomes(shared: &Shared, batch: &Batch, delivery: Option<Delivery>) -> Vec<DeliveryOutcome> {
    let collection = shared.collection.as_str();
    batch
        .docs
        .iter()
        .map(|pending| {
            let id = pending.document.id.clone();
            match &delivery {
                None => DeliveryOutcome::failed(
                    id,
                    Some(collection.to_string()),
                    FailureKind::Cancelled,
                ),
                Some(Delivery::Accepted { retried: false }) => {
                    DeliveryOutcome::committed(id, collection)
                }
                Some(Delivery::Accepted { retried: true }) => {
                    DeliveryOutcome::retried(id, collection)
                }
                Some(Delivery::PartiallyRejected { failures, retried }) => {
                    match failures.iter().find(|f| f.document_id == id) {
                        Some(failure) => DeliveryOutcome::failed(
                            id,
                            Some(collection.to_string()),
                            FailureKind::PermanentDelivery {
                                reason: failure.reason.clone(),
                            },
                        ),
                        None if *retried => DeliveryOutcome::retried(id, collection),
                        None => DeliveryOutcome::committed(id, collection),
                    }
                }
                Some(Delivery::Exhausted { attempts, reason }) => DeliveryOutcome::failed(
                    id,
                    Some(collection.to_string()),
                    FailureKind::TransientDelivery {
                        attempts: *attempts,
                        reason: reason.clone(),
                    },
                ),
                Some(Delivery::Permanent { reason }) => DeliveryOutcome::failed(
                    id,
                    Some(collection.to_string()),
                    FailureKind::PermanentDelivery {
                        reason: reason.clone(),
                    },
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use doc_ingest_shared::DeliveryStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted backend: pops one error per `add_batch` call until the
    /// script runs dry, then accepts. Records the ids of every accepted
    /// batch in arrival order.
    struct MockClient {
        batches: StdMutex<Vec<Vec<String>>>,
        script: StdMutex<VecDeque<BackendError>>,
        commits: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockClient {
        fn accepting() -> Arc<Self> {
            Self::scripted(vec![])
        }

        fn scripted(errors: Vec<BackendError>) -> Arc<Self> {
            Arc::new(Self {
                batches: StdMutex::new(Vec::new()),
                script: StdMutex::new(errors.into()),
                commits: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated() -> (Arc<Self>, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let client = Arc::new(Self {
                batches: StdMutex::new(Vec::new()),
                script: StdMutex::new(VecDeque::new()),
                commits: AtomicUsize::new(0),
                gate: Some(gate.clone()),
            });
            (client, gate)
        }

        fn batch_ids(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchBackendClient for MockClient {
        async fn add_batch(
            &self,
            _collection: &str,
            documents: &[MappedDocument],
        ) -> Result<(), BackendError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(err) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.batches
                .lock()
                .unwrap()
                .push(documents.iter().map(|d| d.id.clone()).collect());
            Ok(())
        }

        async fn commit(
            &self,
            _collection: &str,
            _options: &CommitOptions,
        ) -> Result<(), BackendError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_by_query(
            &self,
            _collection: &str,
            _query: &str,
        ) -> Result<u64, BackendError> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<bool, BackendError> {
            Ok(true)
        }
    }

    fn config() -> LoaderConfig {
        LoaderConfig {
            max_batch_docs: 2,
            linger: Duration::ZERO,
            max_in_flight_batches: 4,
            send_concurrency: 2,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        }
    }

    fn doc(id: &str) -> MappedDocument {
        MappedDocument::new(id)
    }

    #[tokio::test]
    async fn test_full_batch_is_delivered_without_flush() {
        let client = MockClient::accepting();
        let loader = DocumentLoader::new("articles", client.clone(), config());

        let t1 = loader.enqueue(doc("1")).await.unwrap();
        let t2 = loader.enqueue(doc("2")).await.unwrap();

        assert_eq!(t1.outcome().await.status, DeliveryStatus::Committed);
        assert_eq!(t2.outcome().await.status, DeliveryStatus::Committed);
        assert_eq!(client.batch_ids(), vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[tokio::test]
    async fn test_flush_delivers_partial_batch_and_is_idempotent() {
        let client = MockClient::accepting();
        let loader = DocumentLoader::new("articles", client.clone(), config());

        let _ticket = loader.enqueue(doc("only")).await.unwrap();
        let outcomes = loader.flush().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_committed());

        // Nothing pending: no new batch is sent and nothing is drained.
        assert!(loader.flush().await.is_empty());
        assert_eq!(client.batch_ids().len(), 1);
        assert_eq!(loader.state().await, LoaderState::Open);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_sealing_enqueue() {
        let (client, gate) = MockClient::gated();
        let mut cfg = config();
        cfg.max_batch_docs = 1;
        cfg.max_in_flight_batches = 1;
        let loader = DocumentLoader::new("articles", client.clone(), cfg);

        let t1 = loader.enqueue(doc("1")).await.unwrap();

        let rejected = loader.enqueue(doc("2")).await.err().unwrap();
        assert_eq!(rejected.document.id, "2");
        assert!(matches!(
            rejected.reason,
            EnqueueRejected::Backpressure(BackpressureSignal {
                in_flight: 1,
                ceiling: 1,
                ..
            })
        ));

        gate.add_permits(1);
        assert!(t1.outcome().await.is_committed());
        loader.flush().await;

        // Capacity is available again after the batch settles.
        let t2 = loader.enqueue(doc("2")).await.unwrap();
        gate.add_permits(1);
        assert!(t2.outcome().await.is_committed());
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_commit() {
        let client = MockClient::scripted(vec![
            BackendError::timeout("slow"),
            BackendError::connection("refused"),
        ]);
        let loader = DocumentLoader::new("articles", client.clone(), config());

        let ticket = loader.enqueue(doc("1")).await.unwrap();
        loader.flush().await;

        assert_eq!(
            ticket.outcome().await.status,
            DeliveryStatus::RetriedAndCommitted
        );
        assert_eq!(client.batch_ids(), vec![vec!["1".to_string()]]);
    }

    #[tokio::test]
    async fn test_retry_ceiling_fails_batch_as_transient() {
        let client = MockClient::scripted(vec![
            BackendError::timeout("1"),
            BackendError::timeout("2"),
            BackendError::timeout("3"),
            BackendError::timeout("4"),
        ]);
        let mut cfg = config();
        cfg.max_retries = 2;
        let loader = DocumentLoader::new("articles", client.clone(), cfg);

        let ticket = loader.enqueue(doc("1")).await.unwrap();
        loader.flush().await;

        match ticket.outcome().await.status {
            DeliveryStatus::Failed(FailureKind::TransientDelivery { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("expected transient failure, got {:?}", other),
        }
        assert!(client.batch_ids().is_empty());
    }

    #[tokio::test]
    async fn test_partial_rejection_fails_only_offenders() {
        let client = MockClient::scripted(vec![BackendError::Rejected {
            failures: vec![DocumentFailure {
                document_id: "2".to_string(),
                reason: "unknown field".to_string(),
            }],
        }]);
        let loader = DocumentLoader::new("articles", client, config());

        let t1 = loader.enqueue(doc("1")).await.unwrap();
        let t2 = loader.enqueue(doc("2")).await.unwrap();

        assert!(t1.outcome().await.is_committed());
        match t2.outcome().await.status {
            DeliveryStatus::Failed(FailureKind::PermanentDelivery { reason }) => {
                assert_eq!(reason, "unknown field");
            }
            other => panic!("expected permanent failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batches_are_sent_in_seal_order() {
        let client = MockClient::accepting();
        let mut cfg = config();
        cfg.max_batch_docs = 1;
        cfg.send_concurrency = 1;
        let loader = DocumentLoader::new("articles", client.clone(), cfg);

        let tickets = vec![
            loader.enqueue(doc("a")).await.unwrap(),
            loader.enqueue(doc("b")).await.unwrap(),
            loader.enqueue(doc("c")).await.unwrap(),
        ];
        for ticket in tickets {
            assert!(ticket.outcome().await.is_committed());
        }

        assert_eq!(
            client.batch_ids(),
            vec![
                vec!["a".to_string()],
                vec!["b".to_string()],
                vec!["c".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_skips_when_nothing_new_was_written() {
        let client = MockClient::accepting();
        let loader = DocumentLoader::new("articles", client.clone(), config());

        // No writes at all: nothing to commit.
        assert!(!loader.commit(&CommitOptions::wait_all()).await.unwrap());
        assert_eq!(client.commits.load(Ordering::SeqCst), 0);

        let _ = loader.enqueue(doc("1")).await.unwrap();
        loader.flush().await;

        assert!(loader.commit(&CommitOptions::wait_all()).await.unwrap());
        assert!(!loader.commit(&CommitOptions::wait_all()).await.unwrap());
        assert_eq!(client.commits.load(Ordering::SeqCst), 1);

        let _ = loader.enqueue(doc("2")).await.unwrap();
        loader.flush().await;
        assert!(loader.commit(&CommitOptions::wait_all()).await.unwrap());
        assert_eq!(client.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects_new_work() {
        let client = MockClient::accepting();
        let loader = DocumentLoader::new("articles", client.clone(), config());

        let _ = loader.enqueue(doc("1")).await.unwrap();
        let outcomes = loader.shutdown().await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_committed());
        assert_eq!(loader.state().await, LoaderState::Closed);

        let rejected = loader.enqueue(doc("late")).await.err().unwrap();
        assert_eq!(rejected.document.id, "late");
        assert!(matches!(rejected.reason, EnqueueRejected::Closed(_)));
    }

    #[tokio::test]
    async fn test_shutdown_timeout_cancels_stuck_deliveries() {
        let (client, _gate) = MockClient::gated();
        let mut cfg = config();
        cfg.max_batch_docs = 1;
        let loader = DocumentLoader::new("articles", client, cfg);

        let ticket = loader.enqueue(doc("stuck")).await.unwrap();
        let outcomes = loader
            .shutdown_with_timeout(Duration::from_millis(20))
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].status,
            DeliveryStatus::Failed(FailureKind::Cancelled)
        );
        assert_eq!(
            ticket.outcome().await.status,
            DeliveryStatus::Failed(FailureKind::Cancelled)
        );
        assert_eq!(loader.state().await, LoaderState::Closed);
    }

    #[tokio::test]
    async fn test_linger_timer_seals_partial_batches() {
        let client = MockClient::accepting();
        let mut cfg = config();
        cfg.linger = Duration::from_millis(10);
        let loader = DocumentLoader::new("articles", client.clone(), cfg);

        let ticket = loader.enqueue(doc("1")).await.unwrap();
        // No flush: the linger timer alone must move the document.
        assert!(ticket.outcome().await.is_committed());
        assert_eq!(client.batch_ids(), vec![vec!["1".to_string()]]);
    }
}
