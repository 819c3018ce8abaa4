// Copyright 2025
// Licensed under the Elastic License v2.0

//! Statement flow between mapping and the database.
//!
//! ```text
//!   mapping tasks ──► mpsc queue ──► StatementBatcher ──► spawned writes
//!                                          │                    │
//!                                          │               WriteHandles
//!                                          └──► FailureHandler ◄┘
//! ```

pub mod batcher;
pub mod handles;
pub mod offsets;

use std::sync::Arc;

use crate::core::{BoundStatement, KeyspaceTable, SinkRecord};

pub use batcher::{BatcherHandle, StatementBatcher};
pub use handles::WriteHandles;
pub use offsets::FailureOffsets;

/// One mapped record on its way to one table
#[derive(Debug, Clone)]
pub struct RecordAndStatement {
    pub record: Arc<SinkRecord>,
    pub table: KeyspaceTable,
    pub statement: BoundStatement,
}

impl RecordAndStatement {
    pub fn new(record: Arc<SinkRecord>, table: KeyspaceTable, statement: BoundStatement) -> Self {
        Self {
            record,
            table,
            statement,
        }
    }
}
