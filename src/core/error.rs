// Copyright 2025
// Licensed under the Elastic License v2.0

use thiserror::Error;

use crate::core::statement::CqlType;

/// Failure of the value codec layer to encode a field value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("no conversion from {value_kind} to {cql_type}")]
    Unsupported {
        value_kind: &'static str,
        cql_type: CqlType,
    },

    #[error("invalid {cql_type} literal '{input}': {reason}")]
    InvalidLiteral {
        input: String,
        cql_type: CqlType,
        reason: String,
    },

    #[error("value {value} out of range for {cql_type}")]
    OutOfRange { value: String, cql_type: CqlType },
}

/// Record-to-statement mapping failure for one (record, table) pair
#[derive(Debug, Clone, Error)]
pub enum MappingError {
    #[error("no table mapping is configured for topic '{topic}'")]
    UnknownTopic { topic: String },

    #[error(
        "Required field '{field}' (mapped to column {column}) was missing from record. \
         Please remove it from the mapping."
    )]
    MissingField { field: String, column: String },

    #[error(
        "Extraneous field '{field}' was found in record. \
         Please declare it explicitly in the mapping."
    )]
    ExtraneousField { field: String },

    #[error("Cannot convert field '{field}' to column {column}: {source}")]
    Conversion {
        field: String,
        column: String,
        #[source]
        source: CodecError,
    },

    #[error(
        "Partition key column {column} cannot be mapped to null. \
         Check that your mapping setting matches your dataset contents."
    )]
    PartitionKeyNull { column: String },

    #[error(
        "Partition key column {column} cannot be left unmapped. \
         Check that your mapping setting matches your dataset contents."
    )]
    PartitionKeyUnset { column: String },
}

impl MappingError {
    /// A row cannot be addressed without its partition key; these failures
    /// are never tolerated.
    pub fn is_partition_key_failure(&self) -> bool {
        matches!(
            self,
            MappingError::PartitionKeyNull { .. } | MappingError::PartitionKeyUnset { .. }
        )
    }
}

/// The database rejected or failed a write
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("write timed out: {message}")]
    Timeout { message: String },

    #[error("not enough replicas available: {message}")]
    Unavailable { message: String },

    #[error("write rejected by server: {message}")]
    Rejected { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },
}

impl WriteError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

/// Why a single record could not be written
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("{message}")]
    Internal { message: String },
}

impl RecordError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the failure happened while the database executed the write,
    /// as opposed to while decoding/mapping the record.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, RecordError::Write(_))
    }

    pub fn is_partition_key_failure(&self) -> bool {
        matches!(self, RecordError::Mapping(e) if e.is_partition_key_failure())
    }
}

/// Task-level errors surfaced to the caller of the sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// The whole batch was abandoned; the log must redeliver it.
    #[error("Interrupted while issuing queries")]
    Interrupted,

    #[error("sink task is stopped")]
    Stopped,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("failed to prepare statement for {table}: {message}")]
    Prepare { table: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SinkError {
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller should redeliver the batch and try again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SinkError::Interrupted)
    }
}

/// Result type alias using SinkError
pub type SinkResult<T> = Result<T, SinkError>;
