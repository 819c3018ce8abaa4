// Copyright 2025
// Licensed under the Elastic License v2.0

//! At-least-once sink writing partitioned change-event batches into CQL
//! tables.
//!
//! ```text
//!   SinkTask::put(records)
//!        │
//!        ├──► RecordMapper (per table, bounded pool) ──► queue
//!        │                                                 │
//!        │                                   StatementBatcher ──► Session::execute
//!        │                                                 │
//!        └──► FailureHandler ◄──── mapping / write failures┘
//!                  │
//!             FailureOffsets ──► SinkTask::pre_commit
//! ```
//!
//! Per-record failures never fail a batch. Unless the error policy
//! tolerates them, they hold back the lowest failed offset of their
//! partition so the log redelivers from there.

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod mapping;
pub mod pipeline;
pub mod session;
pub mod task;

pub use crate::config::{IgnoreErrors, SinkConfig, SinkSettings, TableConfig, TopicConfig};
pub use crate::core::{
    KeyspaceTable, OffsetMap, Session, SinkContext, SinkError, SinkRecord, SinkResult,
    TopicPartition, Value, ValueCodec,
};
pub use crate::mapping::StandardCodec;
pub use crate::session::InMemorySession;
pub use crate::task::{InterruptHandle, MetricsSnapshot, SinkTask};
