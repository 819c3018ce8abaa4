// Copyright 2025
// Licensed under the Elastic License v2.0

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// In-flight database writes of one batch.
///
/// The batcher pushes one handle per submitted statement; the task drains
/// the set once the batcher has stopped.
#[derive(Debug, Clone, Default)]
pub struct WriteHandles {
    inner: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WriteHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handle: JoinHandle<()>) {
        self.inner.lock().push(handle);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Takes every handle pushed so far.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Best-effort cancellation of every write not yet drained.
    pub fn cancel_all(&self) {
        for handle in self.inner.lock().iter() {
            handle.abort();
        }
    }
}
