// Copyright 2025
// Licensed under the Elastic License v2.0

use parking_lot::Mutex;

use crate::core::{OffsetMap, TopicPartition};

/// Lowest failed offset per partition within the current batch.
///
/// Entries only ever move down while a batch runs; the tracker is cleared
/// at the start of the next one.
#[derive(Debug, Default)]
pub struct FailureOffsets {
    offsets: Mutex<OffsetMap>,
}

impl FailureOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed offset. Returns `true` when the tracked offset for
    /// the partition changed, which is when the log must be rewound.
    pub fn record_failure(&self, partition: &TopicPartition, offset: i64) -> bool {
        let mut offsets = self.offsets.lock();
        match offsets.get_mut(partition) {
            Some(current) if *current <= offset => false,
            Some(current) => {
                *current = offset;
                true
            }
            None => {
                offsets.insert(partition.clone(), offset);
                true
            }
        }
    }

    pub fn get(&self, partition: &TopicPartition) -> Option<i64> {
        self.offsets.lock().get(partition).copied()
    }

    pub fn snapshot(&self) -> OffsetMap {
        self.offsets.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.lock().is_empty()
    }

    pub fn clear(&self) {
        self.offsets.lock().clear();
    }

    /// Overlays failed offsets onto offsets about to be committed.
    pub fn merge_into(&self, current: &mut OffsetMap) {
        let offsets = self.offsets.lock();
        for (partition, offset) in offsets.iter() {
            current.insert(partition.clone(), *offset);
        }
    }
}
