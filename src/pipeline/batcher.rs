// Copyright 2025
// Licensed under the Elastic License v2.0

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::core::{BatchStatement, RecordError, Session, SinkRecord, Statement};
use crate::pipeline::{RecordAndStatement, WriteHandles};
use crate::task::failure::FailureHandler;
use crate::task::metrics::SinkMetrics;

#[derive(Debug, Default)]
struct BatcherState {
    stop_requested: AtomicBool,
    successful_records: AtomicU64,
}

/// Control side of a running [`StatementBatcher`]
#[derive(Debug, Clone)]
pub struct BatcherHandle {
    state: Arc<BatcherState>,
}

impl BatcherHandle {
    /// Asks the batcher to drain what is queued and exit. Idempotent.
    pub fn stop(&self) {
        self.state.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state.stop_requested.load(Ordering::Acquire)
    }

    /// Records confirmed written by completed writes so far.
    pub fn successful_record_count(&self) -> u64 {
        self.state.successful_records.load(Ordering::Relaxed)
    }
}

/// Single consumer of the statement queue.
///
/// Consecutive statements for the same table are grouped up to
/// `max_batch_records`. A group is submitted when it is full, when a
/// statement for another table arrives, or when the queue is drained after
/// a stop request. Every submission runs on its own task and its handle is
/// pushed into the shared [`WriteHandles`].
pub struct StatementBatcher {
    rx: mpsc::UnboundedReceiver<RecordAndStatement>,
    session: Arc<dyn Session>,
    failures: Arc<FailureHandler>,
    metrics: Arc<SinkMetrics>,
    handles: WriteHandles,
    max_batch_records: usize,
    poll_interval: Duration,
    state: Arc<BatcherState>,
}

impl StatementBatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RecordAndStatement>,
        session: Arc<dyn Session>,
        failures: Arc<FailureHandler>,
        metrics: Arc<SinkMetrics>,
        handles: WriteHandles,
        max_batch_records: usize,
        poll_interval: Duration,
    ) -> (Self, BatcherHandle) {
        let state = Arc::new(BatcherState::default());
        let batcher = Self {
            rx,
            session,
            failures,
            metrics,
            handles,
            max_batch_records: max_batch_records.max(1),
            poll_interval,
            state: Arc::clone(&state),
        };
        (batcher, BatcherHandle { state })
    }

    fn stop_requested(&self) -> bool {
        self.state.stop_requested.load(Ordering::Acquire)
    }

    /// Runs until stop was requested and the queue is empty, or until every
    /// sender is gone.
    pub async fn run(mut self) {
        let mut pending: Vec<RecordAndStatement> = Vec::with_capacity(self.max_batch_records);

        loop {
            let next = if self.stop_requested() {
                match self.rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => break,
                }
            } else {
                match tokio::time::timeout(self.poll_interval, self.rx.recv()).await {
                    Ok(Some(item)) => Some(item),
                    Ok(None) => break,
                    Err(_) => None,
                }
            };

            let Some(item) = next else {
                continue;
            };

            if pending.first().is_some_and(|p| p.table != item.table) {
                self.submit(std::mem::take(&mut pending));
            }
            pending.push(item);
            if pending.len() >= self.max_batch_records {
                self.submit(std::mem::take(&mut pending));
            }
        }

        if !pending.is_empty() {
            self.submit(pending);
        }
        debug!("Statement batcher stopped");
    }

    fn submit(&self, group: Vec<RecordAndStatement>) {
        let Some(table) = group.first().map(|g| g.table.clone()) else {
            return;
        };

        let (records, statements): (Vec<Arc<SinkRecord>>, Vec<_>) =
            group.into_iter().map(|g| (g.record, g.statement)).unzip();
        let statement = match <[_; 1]>::try_from(statements) {
            Ok([single]) => Statement::Bound(single),
            Err(statements) => Statement::Batch(BatchStatement::unlogged(statements)),
        };
        trace!("Submitting {} statement(s) for {}", records.len(), table);

        self.metrics.increment_batches();

        let session = Arc::clone(&self.session);
        let failures = Arc::clone(&self.failures);
        let metrics = Arc::clone(&self.metrics);
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let cql = statement.cql();
            match session.execute(statement).await {
                Ok(()) => {
                    let count = records.len() as u64;
                    state.successful_records.fetch_add(count, Ordering::Relaxed);
                    metrics.add_written(&table, count);
                }
                Err(e) => {
                    let cause = RecordError::Write(e);
                    for record in &records {
                        failures.handle_failure(record, &cause, Some(&cql), || {
                            metrics.increment_failed(&table)
                        });
                    }
                }
            }
        });
        self.handles.push(handle);
    }
}
