// Copyright 2025
// Licensed under the Elastic License v2.0

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{watch, Mutex};

use crate::core::{SinkError, SinkResult};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle = 0,
    Processing = 1,
    Stopping = 2,
    Stopped = 3,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Idle,
            1 => TaskState::Processing,
            2 => TaskState::Stopping,
            _ => TaskState::Stopped,
        }
    }
}

/// Serializes processing cycles and excludes stop while one runs.
///
/// ```text
///   Idle ──run_processing──► Processing ──done──► Idle
///     │                          │
///     └──────run_stop────────────┴──► Stopping ──post──► Stopped
/// ```
#[derive(Debug)]
pub struct TaskStateManager {
    state: AtomicU8,
    gate: Mutex<()>,
    stopped: watch::Sender<bool>,
}

impl Default for TaskStateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the state to Idle when a processing cycle ends, unless a stop
/// moved it elsewhere in the meantime.
struct ProcessingGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.state.compare_exchange(
            TaskState::Processing as u8,
            TaskState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl TaskStateManager {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Idle as u8),
            gate: Mutex::new(()),
            stopped: watch::channel(false).0,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs one processing cycle.
    ///
    /// # Errors
    /// `SinkError::Stopped` once a stop has begun; otherwise whatever `body`
    /// returns.
    pub async fn run_processing<F, T>(&self, body: F) -> SinkResult<T>
    where
        F: Future<Output = SinkResult<T>>,
    {
        let _gate = self.gate.lock().await;

        if self
            .state
            .compare_exchange(
                TaskState::Idle as u8,
                TaskState::Processing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SinkError::Stopped);
        }
        let _guard = ProcessingGuard { state: &self.state };

        body.await
    }

    /// Runs `pre` right away, then `post` once no processing cycle is in
    /// flight. Later calls run neither but still return only once the
    /// first stop has completed.
    pub async fn run_stop<P, F>(&self, pre: P, post: F)
    where
        P: FnOnce(),
        F: Future<Output = ()>,
    {
        let previous = TaskState::from_u8(
            self.state
                .swap(TaskState::Stopping as u8, Ordering::AcqRel),
        );
        match previous {
            TaskState::Stopped => {
                self.state.store(TaskState::Stopped as u8, Ordering::Release);
                return;
            }
            TaskState::Stopping => {
                let mut stopped = self.stopped.subscribe();
                let _ = stopped.wait_for(|done| *done).await;
                return;
            }
            TaskState::Idle | TaskState::Processing => {}
        }

        pre();

        let _gate = self.gate.lock().await;
        post.await;
        self.state.store(TaskState::Stopped as u8, Ordering::Release);
        self.stopped.send_replace(true);
    }
}
