// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::config::TableConfig;
use crate::core::error::{CodecError, WriteError};
use crate::core::position::TopicPartition;
use crate::core::record::Value;
use crate::core::statement::{CqlType, PreparedStatement, Statement};

/// Connection to the target database
#[async_trait]
pub trait Session: Send + Sync {
    /// Returns the name of the session implementation
    fn name(&self) -> &'static str;

    /// Prepares the INSERT statement for one configured table.
    ///
    /// The returned statement exposes its bind variables (mapped columns,
    /// plus the timestamp variable when the table uses write timestamps)
    /// and the indices of the partition-key variables.
    async fn prepare(&self, table: &TableConfig) -> Result<PreparedStatement>;

    /// Executes a bound statement or an unlogged batch
    async fn execute(&self, statement: Statement) -> std::result::Result<(), WriteError>;

    /// Releases connections held by the session
    async fn close(&self) -> Result<()>;
}

/// Converts record values into CQL native protocol bytes
pub trait ValueCodec: Send + Sync {
    /// Encodes `value` for a column of type `cql_type`.
    ///
    /// # Returns
    /// `Ok(None)` when the value is null. An empty buffer is read back as
    /// an empty string for ascii, text and varchar columns and as null for
    /// every other type, blob included.
    fn encode(&self, value: &Value, cql_type: &CqlType)
        -> std::result::Result<Option<Bytes>, CodecError>;
}

/// Hooks back into the log infrastructure that feeds the sink
pub trait SinkContext: Send + Sync {
    /// Asks the log to redeliver `partition` starting at `offset`.
    fn rewind(&self, partition: &TopicPartition, offset: i64);
}
