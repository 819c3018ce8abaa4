// Copyright 2025
// Licensed under the Elastic License v2.0

//! Prepared and bound CQL write statements.
//!
//! A [`PreparedStatement`] is produced once per table by the session and
//! shared read-only by every mapping task. Each record gets its own
//! [`BoundStatement`], which is then submitted alone or grouped into an
//! unlogged [`BatchStatement`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::record::KeyspaceTable;

/// Bind variable carrying the record timestamp for `USING TIMESTAMP`
pub const TIMESTAMP_VARIABLE: &str = "message_internal_timestamp";

/// A name that does not denote any known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{input}'")]
pub struct UnknownNameError {
    kind: &'static str,
    input: String,
}

impl UnknownNameError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

/// CQL column types understood by the codec layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqlType {
    Ascii,
    Text,
    Varchar,
    Boolean,
    Int,
    Bigint,
    Counter,
    Float,
    Double,
    Blob,
    Timestamp,
    Uuid,
}

impl CqlType {
    /// Textual types keep empty values as empty strings rather than null.
    pub fn is_textual(&self) -> bool {
        matches!(self, CqlType::Ascii | CqlType::Text | CqlType::Varchar)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CqlType::Ascii => "ascii",
            CqlType::Text => "text",
            CqlType::Varchar => "varchar",
            CqlType::Boolean => "boolean",
            CqlType::Int => "int",
            CqlType::Bigint => "bigint",
            CqlType::Counter => "counter",
            CqlType::Float => "float",
            CqlType::Double => "double",
            CqlType::Blob => "blob",
            CqlType::Timestamp => "timestamp",
            CqlType::Uuid => "uuid",
        }
    }
}

impl FromStr for CqlType {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ascii" => Ok(CqlType::Ascii),
            "text" => Ok(CqlType::Text),
            "varchar" => Ok(CqlType::Varchar),
            "boolean" => Ok(CqlType::Boolean),
            "int" => Ok(CqlType::Int),
            "bigint" => Ok(CqlType::Bigint),
            "counter" => Ok(CqlType::Counter),
            "float" => Ok(CqlType::Float),
            "double" => Ok(CqlType::Double),
            "blob" => Ok(CqlType::Blob),
            "timestamp" => Ok(CqlType::Timestamp),
            "uuid" => Ok(CqlType::Uuid),
            _ => Err(UnknownNameError::new("CQL type", s)),
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write consistency level applied to every statement of a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    #[default]
    LocalOne,
}

impl FromStr for Consistency {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            _ => Err(UnknownNameError::new("consistency level", s)),
        }
    }
}

/// One bind variable of a prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub cql_type: CqlType,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
        }
    }
}

/// Server-side prepared INSERT for one table
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    table: KeyspaceTable,
    query: String,
    variables: Vec<ColumnDefinition>,
    partition_key_indices: Vec<usize>,
}

impl PreparedStatement {
    pub fn new(
        table: KeyspaceTable,
        query: impl Into<String>,
        variables: Vec<ColumnDefinition>,
        partition_key_indices: Vec<usize>,
    ) -> Self {
        Self {
            table,
            query: query.into(),
            variables,
            partition_key_indices,
        }
    }

    pub fn table(&self) -> &KeyspaceTable {
        &self.table
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn variables(&self) -> &[ColumnDefinition] {
        &self.variables
    }

    pub fn partition_key_indices(&self) -> &[usize] {
        &self.partition_key_indices
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    /// Starts binding a new statement with every variable unset.
    pub fn bind(self: &Arc<Self>) -> BoundStatement {
        BoundStatement {
            prepared: Arc::clone(self),
            values: vec![BoundValue::Unset; self.variables.len()],
            consistency: Consistency::default(),
        }
    }
}

/// Value slot of a bound statement
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// Not sent; the server leaves the column untouched
    Unset,
    /// Explicit null, which writes a tombstone
    Null,
    Bytes(Bytes),
}

/// A prepared statement with its variables bound for one record
#[derive(Debug, Clone)]
pub struct BoundStatement {
    prepared: Arc<PreparedStatement>,
    values: Vec<BoundValue>,
    consistency: Consistency,
}

impl BoundStatement {
    pub fn prepared(&self) -> &Arc<PreparedStatement> {
        &self.prepared
    }

    pub fn query(&self) -> &str {
        self.prepared.query()
    }

    pub fn values(&self) -> &[BoundValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&BoundValue> {
        self.values.get(index)
    }

    pub fn is_set(&self, index: usize) -> bool {
        !matches!(self.values.get(index), None | Some(BoundValue::Unset))
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn set_consistency(&mut self, consistency: Consistency) {
        self.consistency = consistency;
    }

    /// Binds already-encoded bytes (or null) at `index`. Out-of-range
    /// indices are ignored.
    pub fn set_bytes(&mut self, index: usize, bytes: Option<Bytes>) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = match bytes {
                Some(b) => BoundValue::Bytes(b),
                None => BoundValue::Null,
            };
        }
    }
}

/// Unlogged batch of bound statements targeting the same table
#[derive(Debug, Clone)]
pub struct BatchStatement {
    statements: Vec<BoundStatement>,
}

impl BatchStatement {
    pub fn unlogged(statements: Vec<BoundStatement>) -> Self {
        Self { statements }
    }

    pub fn statements(&self) -> &[BoundStatement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// What is handed to [`Session::execute`](crate::core::Session::execute)
#[derive(Debug, Clone)]
pub enum Statement {
    Bound(BoundStatement),
    Batch(BatchStatement),
}

impl Statement {
    /// CQL text used as context in failure logs.
    pub fn cql(&self) -> String {
        match self {
            Statement::Bound(s) => s.query().to_string(),
            Statement::Batch(b) => {
                let mut out = String::from("BEGIN UNLOGGED BATCH ");
                for s in b.statements() {
                    out.push_str(s.query());
                    out.push_str("; ");
                }
                out.push_str("APPLY BATCH");
                out
            }
        }
    }

    pub fn consistency(&self) -> Consistency {
        match self {
            Statement::Bound(s) => s.consistency(),
            Statement::Batch(b) => b
                .statements()
                .first()
                .map(|s| s.consistency())
                .unwrap_or_default(),
        }
    }
}
