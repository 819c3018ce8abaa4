// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod error;
pub mod position;
pub mod record;
pub mod statement;
pub mod traits;

pub use error::{CodecError, MappingError, RecordError, SinkError, SinkResult, WriteError};
pub use position::{OffsetMap, TopicPartition};
pub use record::{Header, KeyspaceTable, SinkRecord, Value};
pub use statement::{
    BatchStatement, BoundStatement, BoundValue, ColumnDefinition, Consistency, CqlType,
    PreparedStatement, Statement, UnknownNameError, TIMESTAMP_VARIABLE,
};
pub use traits::{Session, SinkContext, ValueCodec};
