// Copyright 2025
// Licensed under the Elastic License v2.0

//! Sink task orchestration.
//!
//! ```text
//!   put(records)
//!     ├─ clear failure offsets
//!     ├─ spawn StatementBatcher ◄──────────── queue ◄─┐
//!     ├─ map records on the bounded pool ─────────────┘
//!     ├─ stop batcher, await it
//!     └─ await every write handle
//! ```
//!
//! An interrupt at any of the waits abandons the batch: the batcher is
//! aborted, in-flight writes are cancelled and `put` returns the retriable
//! [`SinkError::Interrupted`].

pub mod failure;
pub mod instance;
pub mod metrics;
pub mod state;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{SinkConfig, SinkSettings};
use crate::core::{OffsetMap, Session, SinkContext, SinkError, SinkRecord, SinkResult, ValueCodec};
use crate::pipeline::{FailureOffsets, RecordAndStatement, StatementBatcher, WriteHandles};

use failure::FailureHandler;
use instance::InstanceState;
use state::{TaskState, TaskStateManager};

pub use metrics::{MetricsSnapshot, TableMetricsSnapshot};

/// Cross-task interrupt for a running `put`.
///
/// The flag stays raised until a batch observes it, so an interrupt sent
/// between batches abandons the next one.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }

    fn clear(&self) {
        self.tx.send_replace(false);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves to `true` once the flag is raised; `false` if the sender is gone.
async fn raised(interrupt: &mut watch::Receiver<bool>) -> bool {
    interrupt.wait_for(|raised| *raised).await.is_ok()
}

/// Runs `fut` unless the interrupt flag is (or becomes) raised first.
async fn until_interrupted<F>(interrupt: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        true = raised(interrupt) => None,
        output = fut => Some(output),
    }
}

async fn join_mapping(mapping: &mut JoinSet<()>) -> SinkResult<()> {
    let mut outcome = Ok(());
    while let Some(result) = mapping.join_next().await {
        if let Err(e) = result {
            error!("Mapping task panicked, this is likely a bug: {}", e);
            outcome = Err(SinkError::internal_error(format!("mapping task failed: {}", e)));
        }
    }
    outcome
}

/// At-least-once sink writing record batches to CQL tables
pub struct SinkTask {
    instance: Arc<InstanceState>,
    session: Arc<dyn Session>,
    settings: SinkSettings,
    failures: Arc<FailureHandler>,
    state: TaskStateManager,
    interrupt: InterruptHandle,
}

impl SinkTask {
    /// Prepares every configured table and returns a task ready for `put`.
    ///
    /// # Errors
    /// `SinkError::Config` for unusable settings, `SinkError::Prepare` when
    /// the session cannot prepare a table's statement.
    pub async fn start(
        config: SinkConfig,
        session: Arc<dyn Session>,
        codec: Arc<dyn ValueCodec>,
        context: Arc<dyn SinkContext>,
    ) -> SinkResult<Self> {
        if config.settings.mapping_workers == 0 {
            return Err(SinkError::config_error("mapping_workers must be at least 1"));
        }
        if config.settings.max_batch_records == 0 {
            return Err(SinkError::config_error("max_batch_records must be at least 1"));
        }
        if config.settings.poll_interval_ms == 0 {
            return Err(SinkError::config_error("poll_interval_ms must be at least 1"));
        }

        let instance = InstanceState::build(&config, &session, codec).await?;
        let failures = FailureHandler::new(
            config.settings.ignore_errors,
            Arc::new(FailureOffsets::new()),
            context,
        );

        info!(
            "Sink task started on {} ({} topics, {} mapping workers, ignore errors: {})",
            session.name(),
            config.topics.len(),
            config.settings.mapping_workers,
            config.settings.ignore_errors
        );

        Ok(Self {
            instance: Arc::new(instance),
            session,
            settings: config.settings,
            failures: Arc::new(failures),
            state: TaskStateManager::new(),
            interrupt: InterruptHandle::new(),
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.instance.metrics().snapshot()
    }

    pub fn state(&self) -> TaskState {
        self.state.state()
    }

    /// Lowest failed offset per partition of the last batch
    pub fn failure_offsets(&self) -> OffsetMap {
        self.failures.offsets().snapshot()
    }

    /// Writes one batch of records.
    ///
    /// Per-record failures never fail the batch; they are tracked so that
    /// [`pre_commit`](Self::pre_commit) holds their partitions back.
    ///
    /// # Errors
    /// - `SinkError::Interrupted` (retriable) when interrupted mid-batch
    /// - `SinkError::Stopped` after `stop`
    /// - `SinkError::Internal` when a mapping task panicked
    pub async fn put(&self, records: Vec<SinkRecord>) -> SinkResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.state.run_processing(self.process(records)).await
    }

    /// Overlays this batch's failed offsets onto the offsets about to be
    /// committed.
    pub fn pre_commit(&self, mut offsets: OffsetMap) -> OffsetMap {
        self.failures.offsets().merge_into(&mut offsets);
        offsets
    }

    /// Stops the task once any in-flight batch finishes, then closes the
    /// session.
    pub async fn stop(&self) {
        self.state
            .run_stop(
                || info!("Stopping sink task"),
                async {
                    if let Err(e) = self.session.close().await {
                        warn!("Failed to close session: {:#}", e);
                    }
                    info!("Sink task stopped");
                },
            )
            .await;
    }

    async fn process(&self, records: Vec<SinkRecord>) -> SinkResult<()> {
        let start = Instant::now();
        let total = records.len();
        let mut interrupt = self.interrupt.subscribe();

        self.failures.offsets().clear();

        let (tx, rx) = mpsc::unbounded_channel();
        let handles = WriteHandles::new();
        let (batcher, batcher_handle) = StatementBatcher::new(
            rx,
            Arc::clone(&self.session),
            Arc::clone(&self.failures),
            Arc::clone(self.instance.metrics()),
            handles.clone(),
            self.settings.max_batch_records,
            self.settings.poll_interval(),
        );
        let mut batcher_task = tokio::spawn(batcher.run());

        let mut mapping = self.spawn_mapping(records, tx);

        let joined = until_interrupted(&mut interrupt, join_mapping(&mut mapping)).await;
        let mapping_outcome = match joined {
            Some(outcome) => outcome,
            None => {
                batcher_handle.stop();
                mapping.shutdown().await;
                batcher_task.abort();
                let _ = batcher_task.await;
                return self.abandon(&handles, VecDeque::new()).await;
            }
        };

        batcher_handle.stop();
        let drained = until_interrupted(&mut interrupt, &mut batcher_task).await;
        match drained {
            Some(Ok(())) => {}
            Some(Err(e)) => error!("Statement batcher failed, this is likely a bug: {}", e),
            None => {
                batcher_task.abort();
                let _ = batcher_task.await;
                return self.abandon(&handles, VecDeque::new()).await;
            }
        }

        let mut writes: VecDeque<JoinHandle<()>> = handles.drain().into();
        let completed = until_interrupted(&mut interrupt, async {
            while let Some(write) = writes.front_mut() {
                let result = write.await;
                writes.pop_front();
                if let Err(e) = result {
                    error!("Write task failed, this is likely a bug: {}", e);
                }
            }
        })
        .await;
        if completed.is_none() {
            return self.abandon(&handles, writes).await;
        }

        debug!(
            "Completed {}/{} inserts in {} ms",
            batcher_handle.successful_record_count(),
            total,
            start.elapsed().as_millis()
        );
        mapping_outcome
    }

    fn spawn_mapping(
        &self,
        records: Vec<SinkRecord>,
        queue: mpsc::UnboundedSender<RecordAndStatement>,
    ) -> JoinSet<()> {
        let semaphore = Arc::new(Semaphore::new(self.settings.mapping_workers));
        let mut mapping = JoinSet::new();

        for record in records {
            let record = Arc::new(record);
            let semaphore = Arc::clone(&semaphore);
            let instance = Arc::clone(&self.instance);
            let failures = Arc::clone(&self.failures);
            let queue = queue.clone();

            mapping.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                instance.map_and_queue_record(&record, &failures, &queue);
            });
        }
        mapping
    }

    /// Cancels every outstanding write and reports the batch as interrupted.
    async fn abandon(
        &self,
        handles: &WriteHandles,
        mut remaining: VecDeque<JoinHandle<()>>,
    ) -> SinkResult<()> {
        remaining.extend(handles.drain());
        for write in &remaining {
            write.abort();
        }
        let cancelled = remaining.len();
        for write in remaining {
            let _ = write.await;
        }

        self.interrupt.clear();
        warn!(
            "Interrupted while issuing queries, cancelled {} in-flight write(s)",
            cancelled
        );
        Err(SinkError::Interrupted)
    }
}
