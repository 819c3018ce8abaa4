// Copyright 2025
// Licensed under the Elastic License v2.0

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::config::IgnoreErrors;
use crate::core::{RecordError, SinkContext, SinkRecord};
use crate::pipeline::offsets::FailureOffsets;

/// Single entry point for every per-record failure of a batch.
///
/// Decides whether the failure withholds the record's offset, rewinds the
/// log when the tracked offset moves down, bumps the caller's counter and
/// logs the failure.
pub struct FailureHandler {
    policy: IgnoreErrors,
    offsets: Arc<FailureOffsets>,
    context: Arc<dyn SinkContext>,
    lock: Mutex<()>,
}

impl FailureHandler {
    pub fn new(
        policy: IgnoreErrors,
        offsets: Arc<FailureOffsets>,
        context: Arc<dyn SinkContext>,
    ) -> Self {
        Self {
            policy,
            offsets,
            context,
            lock: Mutex::new(()),
        }
    }

    pub fn offsets(&self) -> &Arc<FailureOffsets> {
        &self.offsets
    }

    /// Whether `cause` must hold back the record's offset under the policy.
    /// Partition-key failures always do.
    pub fn withholds_offset(&self, cause: &RecordError) -> bool {
        if cause.is_partition_key_failure() {
            return true;
        }
        match self.policy {
            IgnoreErrors::None => true,
            IgnoreErrors::Driver => !cause.is_write_failure(),
            IgnoreErrors::All => false,
        }
    }

    /// # Arguments
    ///
    /// * `record` - The record that could not be written
    /// * `cause` - Mapping or write failure
    /// * `statement` - CQL text of the failed write, if it got that far
    /// * `increment` - Failure counter to bump
    pub fn handle_failure<F>(
        &self,
        record: &SinkRecord,
        cause: &RecordError,
        statement: Option<&str>,
        increment: F,
    ) where
        F: FnOnce(),
    {
        let _guard = self.lock.lock();

        increment();

        if self.withholds_offset(cause) {
            let partition = record.topic_partition();
            if self.offsets.record_failure(&partition, record.offset) {
                self.context.rewind(&partition, record.offset);
            }
        }

        match statement {
            Some(cql) => warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Error writing row for record {}: {}\n   statement: {}",
                record,
                cause,
                cql
            ),
            None => warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Error mapping record {}: {}",
                record,
                cause
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MappingError, TopicPartition, WriteError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingContext {
        rewinds: Mutex<Vec<(TopicPartition, i64)>>,
    }

    impl SinkContext for RecordingContext {
        fn rewind(&self, partition: &TopicPartition, offset: i64) {
            self.rewinds.lock().push((partition.clone(), offset));
        }
    }

    fn handler(policy: IgnoreErrors) -> (FailureHandler, Arc<RecordingContext>) {
        let context = Arc::new(RecordingContext::default());
        let handler = FailureHandler::new(policy, Arc::new(FailureOffsets::new()), context.clone());
        (handler, context)
    }

    fn mapping_error() -> RecordError {
        MappingError::MissingField {
            field: "value.name".to_string(),
            column: "name".to_string(),
        }
        .into()
    }

    fn pk_error() -> RecordError {
        MappingError::PartitionKeyNull {
            column: "id".to_string(),
        }
        .into()
    }

    fn write_error() -> RecordError {
        WriteError::timeout("coordinator timed out").into()
    }

    #[test]
    fn test_policy_matrix() {
        let (none, _) = handler(IgnoreErrors::None);
        let (driver, _) = handler(IgnoreErrors::Driver);
        let (all, _) = handler(IgnoreErrors::All);

        assert!(none.withholds_offset(&mapping_error()));
        assert!(none.withholds_offset(&write_error()));

        assert!(driver.withholds_offset(&mapping_error()));
        assert!(!driver.withholds_offset(&write_error()));

        assert!(!all.withholds_offset(&mapping_error()));
        assert!(!all.withholds_offset(&write_error()));

        for h in [&none, &driver, &all] {
            assert!(h.withholds_offset(&pk_error()));
        }
    }

    #[test]
    fn test_rewinds_only_when_offset_moves_down() {
        let (handler, context) = handler(IgnoreErrors::None);
        let count = AtomicUsize::new(0);
        let bump = || {
            count.fetch_add(1, Ordering::Relaxed);
        };

        handler.handle_failure(&SinkRecord::new("t", 0, 12), &mapping_error(), None, bump);
        handler.handle_failure(&SinkRecord::new("t", 0, 11), &write_error(), Some("INSERT"), bump);
        handler.handle_failure(&SinkRecord::new("t", 0, 14), &mapping_error(), None, bump);

        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(
            *context.rewinds.lock(),
            vec![
                (TopicPartition::new("t", 0), 12),
                (TopicPartition::new("t", 0), 11)
            ]
        );
        assert_eq!(handler.offsets().get(&TopicPartition::new("t", 0)), Some(11));
    }

    #[test]
    fn test_tolerated_failure_still_counts() {
        let (handler, context) = handler(IgnoreErrors::All);
        let count = AtomicUsize::new(0);

        handler.handle_failure(&SinkRecord::new("t", 0, 3), &write_error(), Some("INSERT"), || {
            count.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(context.rewinds.lock().is_empty());
        assert!(handler.offsets().is_empty());
    }
}
