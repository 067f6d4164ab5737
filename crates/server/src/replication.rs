//! Background replication of the secondary mirror from the upstream change feed.
//!
//! The controller first asks the feed for its `update_seq` (the progress
//! denominator). A failed handshake is retried forever with exponential
//! backoff. Once the handshake succeeds the live stream takes over: it pulls
//! batches from the replica's checkpoint, applies them, persists the new
//! checkpoint and reports progress. Stream errors are logged and the stream
//! resumes on its own after a short pause.

use crate::feed::{Change, ChangeFeed};
use crate::metrics;
use larder_core::config::ReplicationConfig;
use larder_core::{PackageDocument, Sequence};
use larder_metadata::{DocumentStore, MetadataError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Exponential retry delay: starts at `base`, grows by `factor` per failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64) -> Self {
        Self {
            base,
            factor,
            current: base,
        }
    }

    /// The delay to wait now. The following call returns a longer one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .unwrap_or(Duration::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Share of the upstream feed already replicated, in percent with two decimals.
///
/// Clamped at 100 because `update_seq` keeps moving while we replicate.
pub fn progress_percent(last_seq: u64, update_seq: u64) -> f64 {
    if update_seq == 0 {
        return 100.0;
    }
    let percent = (last_seq as f64 / update_seq as f64 * 10000.0).floor() / 100.0;
    percent.min(100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationState {
    Idle,
    Syncing,
    Backoff,
    Cancelled,
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationStatus {
    pub state: ReplicationState,
    pub last_seq: Sequence,
    pub update_seq: Sequence,
    pub percent: f64,
    /// Delay of the pending retry, zero outside of backoff.
    pub backoff_ms: u64,
    /// Failed handshakes since start.
    pub retries: u64,
}

impl Default for ReplicationStatus {
    fn default() -> Self {
        Self {
            state: ReplicationState::Idle,
            last_seq: Sequence::zero(),
            update_seq: Sequence::zero(),
            percent: 0.0,
            backoff_ms: 0,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A non-empty batch was applied.
    Change { last_seq: Sequence, docs_written: usize },
    Error(String),
}

pub struct ReplicationController {
    feed: Arc<dyn ChangeFeed>,
    replica: Arc<dyn DocumentStore>,
    config: ReplicationConfig,
}

impl ReplicationController {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        replica: Arc<dyn DocumentStore>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            feed,
            replica,
            config,
        }
    }

    /// Spawn the replication task. It runs until the handle is cancelled.
    pub fn start(self) -> ReplicationHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ReplicationStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = Worker {
            feed: self.feed,
            replica: self.replica,
            backoff: Backoff::new(self.config.base_backoff(), self.config.backoff_factor),
            config: self.config,
            cancel: cancel.clone(),
            status: status_tx,
            events: events_tx.clone(),
        };
        let task = tokio::spawn(worker.run());

        ReplicationHandle {
            cancel,
            status: status_rx,
            events: events_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Owned handle on a running replication task.
pub struct ReplicationHandle {
    cancel: CancellationToken,
    status: watch::Receiver<ReplicationStatus>,
    events: broadcast::Sender<ReplicationEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationHandle {
    pub fn status(&self) -> ReplicationStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ReplicationStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop replication and wait for the task to exit. Idempotent.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Replication task ended abnormally");
        }
    }
}

struct Worker {
    feed: Arc<dyn ChangeFeed>,
    replica: Arc<dyn DocumentStore>,
    config: ReplicationConfig,
    backoff: Backoff,
    cancel: CancellationToken,
    status: watch::Sender<ReplicationStatus>,
    events: broadcast::Sender<ReplicationEvent>,
}

impl Worker {
    async fn run(mut self) {
        info!(source = %self.feed.source(), "Replication started");

        while !self.cancel.is_cancelled() {
            let info = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                info = self.feed.info() => info,
            };

            match info {
                Ok(info) => {
                    self.backoff.reset();
                    self.live(info.update_seq).await;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    metrics::REPLICATION_RETRIES.inc();
                    warn!(
                        source = %self.feed.source(),
                        error = %e,
                        retry_ms = delay.as_millis() as u64,
                        "Failed to fetch change feed info, retrying"
                    );
                    self.status.send_modify(|s| {
                        s.state = ReplicationState::Backoff;
                        s.backoff_ms = delay.as_millis() as u64;
                        s.retries += 1;
                    });
                    self.emit(ReplicationEvent::Error(e.to_string()));

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.status.send_modify(|s| {
            s.state = ReplicationState::Cancelled;
            s.backoff_ms = 0;
        });
        info!(source = %self.feed.source(), "Replication stopped");
    }

    /// Pull batches until cancelled.
    async fn live(&mut self, update_seq: Sequence) {
        let source = self.feed.source().to_string();
        let mut since = match self.replica.checkpoint(&source).await {
            Ok(seq) => seq.unwrap_or_else(Sequence::zero),
            Err(e) => {
                warn!(error = %e, "Failed to read replication checkpoint, starting over");
                Sequence::zero()
            }
        };

        let percent = progress_percent(since.number(), update_seq.number());
        self.status.send_modify(|s| {
            s.state = ReplicationState::Syncing;
            s.last_seq = since.clone();
            s.update_seq = update_seq.clone();
            s.percent = percent;
            s.backoff_ms = 0;
        });
        info!(since = %since, update_seq = %update_seq, "Live replication running");

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                batch = self.feed.changes(&since, self.config.batch_size, self.config.poll_timeout()) => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    metrics::REPLICATION_STREAM_ERRORS.inc();
                    warn!(source = %source, error = %e, "Error during live replication");
                    self.emit(ReplicationEvent::Error(e.to_string()));
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.stream_retry()) => continue,
                    }
                }
            };

            let mut written = 0;
            let mut applied = None;
            let mut failure = None;
            for change in &batch.results {
                match self.apply(change).await {
                    Ok(wrote) => {
                        written += usize::from(wrote);
                        applied = Some(change.seq.clone());
                    }
                    Err(e) => {
                        failure = Some((change.id.clone(), e));
                        break;
                    }
                }
            }

            // The checkpoint never moves past a change that wasn't written.
            if let Some((id, e)) = failure {
                metrics::REPLICATION_STREAM_ERRORS.inc();
                warn!(id = %id, error = %e, "Failed to apply change, resuming before it");
                if let Some(seq) = applied {
                    since = seq;
                    self.checkpoint(&source, &since, &update_seq).await;
                }
                self.emit(ReplicationEvent::Error(format!("failed to apply {id}: {e}")));
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.stream_retry()) => continue,
                }
            }

            since = batch.last_seq;
            if batch.results.is_empty() {
                if let Err(e) = self.replica.set_checkpoint(&source, &since).await {
                    warn!(error = %e, "Failed to persist replication checkpoint");
                }
                continue;
            }

            self.backoff.reset();
            let percent = self.checkpoint(&source, &since, &update_seq).await;
            info!(last_seq = %since, percent, "Replication progress");
            self.emit(ReplicationEvent::Change {
                last_seq: since.clone(),
                docs_written: written,
            });
        }
    }

    /// Persist `since` and publish it as progress. Returns the percentage.
    async fn checkpoint(&self, source: &str, since: &Sequence, update_seq: &Sequence) -> f64 {
        if let Err(e) = self.replica.set_checkpoint(source, since).await {
            warn!(error = %e, "Failed to persist replication checkpoint");
        }

        let percent = progress_percent(since.number(), update_seq.number());
        metrics::REPLICATION_LAST_SEQ.set(i64::try_from(since.number()).unwrap_or(i64::MAX));
        self.status.send_modify(|s| {
            s.last_seq = since.clone();
            s.percent = percent;
        });
        percent
    }

    /// Write one change into the replica. Returns whether anything was written.
    async fn apply(&self, change: &Change) -> Result<bool, MetadataError> {
        if change.id.starts_with("_design/") {
            return Ok(false);
        }

        if change.deleted {
            return self.replica.delete(&change.id).await;
        }

        let Some(doc) = &change.doc else {
            debug!(id = %change.id, "Change without document, skipping");
            return Ok(false);
        };

        // Retrying can't fix a malformed document.
        let mut doc: PackageDocument = match serde_json::from_value(doc.clone()) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(id = %change.id, error = %e, "Malformed document in change feed, skipping");
                return Ok(false);
            }
        };
        if doc.name.is_empty() {
            doc.name = change.id.clone();
        }
        self.replica.put(&doc.without_revision()).await?;
        Ok(true)
    }

    fn emit(&self, event: ReplicationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
