// Copyright 2025
// Licensed under the Elastic License v2.0

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::SinkConfig;
use crate::core::{
    KeyspaceTable, MappingError, RecordError, Session, SinkError, SinkRecord, SinkResult,
    ValueCodec,
};
use crate::mapping::{KeyValueRecord, RecordMapper};
use crate::pipeline::RecordAndStatement;
use crate::task::failure::FailureHandler;
use crate::task::metrics::SinkMetrics;

/// Mapper of one (topic, table) pair
pub struct TableWriter {
    pub table: KeyspaceTable,
    pub mapper: RecordMapper,
}

/// Everything prepared at start and shared read-only by mapping tasks
pub struct InstanceState {
    topics: HashMap<String, Vec<TableWriter>>,
    metrics: Arc<SinkMetrics>,
}

impl InstanceState {
    /// Prepares one statement per configured table.
    pub async fn build(
        config: &SinkConfig,
        session: &Arc<dyn Session>,
        codec: Arc<dyn ValueCodec>,
    ) -> SinkResult<Self> {
        let mut topics = HashMap::with_capacity(config.topics.len());
        let mut tables = BTreeSet::new();

        for (topic, topic_config) in &config.topics {
            let mut writers = Vec::with_capacity(topic_config.tables.len());
            for table_config in &topic_config.tables {
                let table = table_config.keyspace_table();
                let prepared =
                    session
                        .prepare(table_config)
                        .await
                        .map_err(|e| SinkError::Prepare {
                            table: table.qualified_name(),
                            message: format!("{:#}", e),
                        })?;
                info!("Prepared insert for topic {} into {}", topic, table);

                writers.push(TableWriter {
                    table: table.clone(),
                    mapper: RecordMapper::new(
                        Arc::new(prepared),
                        table_config,
                        &config.settings,
                        Arc::clone(&codec),
                    ),
                });
                tables.insert(table);
            }
            topics.insert(topic.clone(), writers);
        }

        Ok(Self {
            topics,
            metrics: SinkMetrics::new(tables),
        })
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn writers_for(&self, topic: &str) -> Option<&[TableWriter]> {
        self.topics.get(topic).map(Vec::as_slice)
    }

    /// Maps a record for every table of its topic and queues the results.
    /// Every failure goes through `failures`, including a panic raised by
    /// the mapper or its codec.
    pub fn map_and_queue_record(
        &self,
        record: &Arc<SinkRecord>,
        failures: &FailureHandler,
        queue: &mpsc::UnboundedSender<RecordAndStatement>,
    ) {
        let Some(writers) = self.writers_for(&record.topic) else {
            let cause = RecordError::from(MappingError::UnknownTopic {
                topic: record.topic.clone(),
            });
            failures.handle_failure(record, &cause, None, || {
                self.metrics.increment_unknown_topic()
            });
            return;
        };

        let view = KeyValueRecord::new(record);
        for writer in writers {
            let mapped = panic::catch_unwind(AssertUnwindSafe(|| writer.mapper.map(&view)));
            let cause = match mapped {
                Ok(Ok(statement)) => {
                    let item =
                        RecordAndStatement::new(Arc::clone(record), writer.table.clone(), statement);
                    match queue.send(item) {
                        Ok(()) => continue,
                        Err(_) => RecordError::internal(
                            "statement queue closed before the record could be queued",
                        ),
                    }
                }
                Ok(Err(e)) => RecordError::from(e),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "Mapping record {} for {} panicked, this is likely a bug: {}",
                        record, writer.table, message
                    );
                    RecordError::internal(format!("mapping panicked: {}", message))
                }
            };
            failures.handle_failure(record, &cause, None, || {
                self.metrics.increment_failed(&writer.table)
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
