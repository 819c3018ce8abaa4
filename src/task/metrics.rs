// Copyright 2025
// Licensed under the Elastic License v2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::core::KeyspaceTable;

/// Counters of one target table
#[derive(Debug, Default)]
pub struct TableMetrics {
    written: AtomicU64,
    failed: AtomicU64,
}

impl TableMetrics {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Task-wide counters.
///
/// The per-table map is built once at start and never changes, so lookups
/// need no lock.
#[derive(Debug, Default)]
pub struct SinkMetrics {
    records_written: AtomicU64,
    records_failed: AtomicU64,
    unknown_topic_failures: AtomicU64,
    batches_submitted: AtomicU64,
    tables: HashMap<KeyspaceTable, Arc<TableMetrics>>,
}

impl SinkMetrics {
    pub fn new<I>(tables: I) -> Arc<Self>
    where
        I: IntoIterator<Item = KeyspaceTable>,
    {
        Arc::new(Self {
            tables: tables
                .into_iter()
                .map(|t| (t, Arc::new(TableMetrics::default())))
                .collect(),
            ..Self::default()
        })
    }

    pub fn table(&self, table: &KeyspaceTable) -> Option<&Arc<TableMetrics>> {
        self.tables.get(table)
    }

    pub fn add_written(&self, table: &KeyspaceTable, count: u64) {
        self.records_written.fetch_add(count, Ordering::Relaxed);
        if let Some(t) = self.tables.get(table) {
            t.written.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn increment_failed(&self, table: &KeyspaceTable) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(t) = self.tables.get(table) {
            t.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_unknown_topic(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
        self.unknown_topic_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn records_failed(&self) -> u64 {
        self.records_failed.load(Ordering::Relaxed)
    }

    pub fn unknown_topic_failures(&self) -> u64 {
        self.unknown_topic_failures.load(Ordering::Relaxed)
    }

    pub fn batches_submitted(&self) -> u64 {
        self.batches_submitted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_written: self.records_written(),
            records_failed: self.records_failed(),
            unknown_topic_failures: self.unknown_topic_failures(),
            batches_submitted: self.batches_submitted(),
            tables: self
                .tables
                .iter()
                .map(|(name, t)| {
                    (
                        name.qualified_name(),
                        TableMetricsSnapshot {
                            written: t.written(),
                            failed: t.failed(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_written: u64,
    pub records_failed: u64,
    pub unknown_topic_failures: u64,
    pub batches_submitted: u64,
    pub tables: BTreeMap<String, TableMetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableMetricsSnapshot {
    pub written: u64,
    pub failed: u64,
}
