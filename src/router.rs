//! The inbound message router.
//!
//! One entry point, [`MessageRouter::handle_delivery`], takes a raw queue
//! delivery and guarantees three things: the delivery is acked immediately
//! (generation phases run far longer than broker redelivery timeouts, so
//! at-most-once dispatch with durable state beats redelivery), duplicate or
//! post-terminal commands are suppressed by the idempotency guard, and no
//! error escapes the router boundary — every failure ends as a logged,
//! published event.

use std::sync::Arc;

use tokio::{sync::oneshot, task};
use tracing::{error, info, instrument, warn};

use crate::command::{CommandEnvelope, sniff_identity};
use crate::deletion::{DeletionEngine, DeletionError};
use crate::generation::{GenerationEngine, GenerationError};
use crate::publisher::ProgressPublisher;
use crate::state::ProgressProjection;
use crate::store::{StoreError, WorkflowStore};

/// A raw message plus its acknowledgment callback.
///
/// The ack is whatever the queue integration needs to positively settle the
/// message; it fires exactly once, before any dispatch work.
pub struct Delivery {
    body: Vec<u8>,
    ack: Option<Box<dyn FnOnce() + Send>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, ack: impl FnOnce() + Send + 'static) -> Self {
        Self {
            body,
            ack: Some(Box::new(ack)),
        }
    }

    /// A delivery with no acknowledgment, for tests and replay tooling.
    #[must_use]
    pub fn unacked(body: Vec<u8>) -> Self {
        Self { body, ack: None }
    }

    fn ack(&mut self) {
        if let Some(ack) = self.ack.take() {
            ack();
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("acked", &self.ack.is_none())
            .finish()
    }
}

/// Routes decoded commands to the generation and deletion engines.
pub struct MessageRouter {
    store: WorkflowStore,
    generation: Arc<GenerationEngine>,
    deletion: Arc<DeletionEngine>,
    publisher: ProgressPublisher,
}

impl MessageRouter {
    pub fn new(
        store: WorkflowStore,
        generation: Arc<GenerationEngine>,
        deletion: Arc<DeletionEngine>,
        publisher: ProgressPublisher,
    ) -> Self {
        Self {
            store,
            generation,
            deletion,
            publisher,
        }
    }

    /// Handle one delivery: ack, decode, guard, dispatch. Never errors; every
    /// failure is folded into an event on the way out.
    #[instrument(skip(self, delivery))]
    pub async fn handle_delivery(&self, mut delivery: Delivery) {
        // Ack before any work. Phases can run for minutes; holding the
        // message would only guarantee redelivery mid-phase.
        delivery.ack();
        let body = delivery.body;

        let envelope = match CommandEnvelope::decode(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                let (request_id, user_id) = sniff_identity(&body);
                warn!(
                    request_id = request_id.as_deref().unwrap_or("<unknown>"),
                    error = %err,
                    "rejected inbound command"
                );
                self.publisher
                    .publish_input_error(request_id, user_id, err.to_string());
                return;
            }
        };

        let request_id = envelope.request_id().to_string();
        let user_id = envelope.user_id().to_string();

        match self.store.load_any_progress(&request_id).await {
            Ok(Some(projection)) if projection.blocks_dispatch() => {
                info!(
                    request_id = %request_id,
                    phase = %projection.current_phase,
                    "suppressing command for terminal workflow"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                // Without the guard we cannot promise idempotency; refuse.
                error!(request_id = %request_id, error = %e, "idempotency guard unavailable");
                self.publisher.publish_input_error(
                    Some(request_id),
                    Some(user_id),
                    format!("state store unavailable: {e}"),
                );
                return;
            }
        }

        let result = match envelope {
            CommandEnvelope::Generate(cmd) => self
                .generation
                .handle(cmd)
                .await
                .map_err(|e| DispatchFailure::from_generation(&e)),
            CommandEnvelope::Delete(cmd) => self
                .deletion
                .handle(cmd)
                .await
                .map_err(|e| DispatchFailure::from_deletion(&e)),
        };

        if let Err(failure) = result {
            if failure.stale {
                warn!(request_id = %request_id, "dropped stale command");
            } else {
                warn!(request_id = %request_id, error = %failure.message, "dispatch failed");
            }
            self.publisher.publish_input_error(
                Some(request_id),
                Some(user_id),
                failure.message,
            );
        }
    }

    /// Mark a paused workflow as cancelled by its user.
    ///
    /// Writes a terminal projection; the idempotency guard then turns every
    /// later command for the id into a no-op. Returns `false` when the
    /// workflow was already terminal.
    #[instrument(skip(self))]
    pub async fn cancel(&self, request_id: &str, user_id: &str) -> Result<bool, StoreError> {
        if let Some(existing) = self.store.load_any_progress(request_id).await? {
            if existing.blocks_dispatch() {
                return Ok(false);
            }
        }
        let projection = ProgressProjection::cancelled(request_id, user_id);
        self.store.save_generation_progress(&projection).await?;
        self.publisher.publish_cancelled(request_id, user_id);
        Ok(true)
    }

    /// Spawn `count` workers each pulling one delivery at a time from the
    /// shared receiver (an effective prefetch of one per worker). Workers exit
    /// on shutdown or when every sender is dropped.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receiver: flume::Receiver<Delivery>,
        count: usize,
    ) -> WorkerPool {
        let mut workers = Vec::with_capacity(count.max(1));
        for worker_id in 0..count.max(1) {
            let router = Arc::clone(self);
            let receiver = receiver.clone();
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
            let handle = task::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        recv = receiver.recv_async() => match recv {
                            Ok(delivery) => router.handle_delivery(delivery).await,
                            Err(_) => {
                                info!(worker_id, "command channel closed, worker exiting");
                                break;
                            }
                        }
                    }
                }
            });
            workers.push(Worker {
                shutdown_tx,
                handle,
            });
        }
        WorkerPool { workers }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter").finish()
    }
}

struct DispatchFailure {
    message: String,
    stale: bool,
}

impl DispatchFailure {
    fn from_generation(err: &GenerationError) -> Self {
        Self {
            message: err.to_string(),
            stale: matches!(err, GenerationError::StaleCommand { .. }),
        }
    }

    fn from_deletion(err: &DeletionError) -> Self {
        Self {
            message: err.to_string(),
            stale: matches!(err, DeletionError::StaleCommand { .. }),
        }
    }
}

struct Worker {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Handle over the spawned router workers.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Signal every worker and wait for them to finish their current command.
    /// Deliveries still queued are dropped; redelivery is the sender's job.
    pub async fn shutdown(self) {
        for worker in self.workers {
            let _ = worker.shutdown_tx.send(());
            let _ = worker.handle.await;
        }
    }

    /// Wait for workers to exit on their own, which happens once every
    /// delivery sender is dropped and the queue is drained.
    pub async fn join(self) {
        let mut keep_alive = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            // Hold the shutdown sender while waiting; dropping it would read
            // as a shutdown signal mid-drain.
            keep_alive.push(worker.shutdown_tx);
            let _ = worker.handle.await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
