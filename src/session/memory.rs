// Copyright 2025
// Licensed under the Elastic License v2.0

//! In-memory [`Session`] for development and tests.
//!
//! Tables are declared up front with their column types and partition key.
//! Executed statements are stored as rows of bound values; failures can be
//! injected per table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::TableConfig;
use crate::core::{
    BoundStatement, BoundValue, ColumnDefinition, CqlType, KeyspaceTable, PreparedStatement,
    Session, Statement, WriteError, TIMESTAMP_VARIABLE,
};

/// Column values of a stored row; unset columns are absent
pub type Row = BTreeMap<String, BoundValue>;

#[derive(Debug, Clone)]
struct TableSchema {
    columns: Vec<ColumnDefinition>,
    partition_key: Vec<String>,
    write_timestamp: bool,
}

/// Session backed by process memory
#[derive(Debug, Default)]
pub struct InMemorySession {
    schemas: HashMap<KeyspaceTable, TableSchema>,
    rows: Mutex<HashMap<KeyspaceTable, Vec<Row>>>,
    failing: Mutex<HashSet<KeyspaceTable>>,
    latency: Option<Duration>,
    executions: AtomicU64,
    closed: AtomicBool,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table.
    ///
    /// # Arguments
    ///
    /// * `table` - Keyspace and table name
    /// * `columns` - Column names and types
    /// * `partition_key` - Names of the partition-key columns
    pub fn with_table(
        mut self,
        table: KeyspaceTable,
        columns: &[(&str, CqlType)],
        partition_key: &[&str],
    ) -> Self {
        self.schemas.insert(
            table,
            TableSchema {
                columns: columns
                    .iter()
                    .map(|(name, t)| ColumnDefinition::new(*name, *t))
                    .collect(),
                partition_key: partition_key.iter().map(|s| s.to_string()).collect(),
                write_timestamp: false,
            },
        );
        self
    }

    /// Makes statements for `table` carry the record timestamp.
    pub fn with_write_timestamp(mut self, table: &KeyspaceTable) -> Self {
        if let Some(schema) = self.schemas.get_mut(table) {
            schema.write_timestamp = true;
        }
        self
    }

    /// Delays every execute, to keep writes in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every following write to `table` is rejected.
    pub fn fail_table(&self, table: &KeyspaceTable) {
        self.failing.lock().insert(table.clone());
    }

    pub fn heal_table(&self, table: &KeyspaceTable) {
        self.failing.lock().remove(table);
    }

    pub fn rows(&self, table: &KeyspaceTable) -> Vec<Row> {
        self.rows.lock().get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().values().map(Vec::len).sum()
    }

    /// Number of execute calls, batches counting once.
    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn to_row(statement: &BoundStatement) -> Row {
        statement
            .prepared()
            .variables()
            .iter()
            .zip(statement.values())
            .filter(|(var, value)| var.name != TIMESTAMP_VARIABLE && **value != BoundValue::Unset)
            .map(|(var, value)| (var.name.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn prepare(&self, table: &TableConfig) -> Result<PreparedStatement> {
        let name = table.keyspace_table();
        let schema = self
            .schemas
            .get(&name)
            .with_context(|| format!("table {} does not exist", name))?;

        let mut variables = Vec::with_capacity(table.mapping.len() + 1);
        for column in table.mapping.keys() {
            let definition = schema
                .columns
                .iter()
                .find(|c| &c.name == column)
                .with_context(|| format!("undefined column name {} in table {}", column, name))?;
            variables.push(definition.clone());
        }

        let mut partition_key_indices = Vec::with_capacity(schema.partition_key.len());
        for pk in &schema.partition_key {
            let index = variables
                .iter()
                .position(|v| &v.name == pk)
                .with_context(|| format!("partition key column {} of {} is not mapped", pk, name))?;
            partition_key_indices.push(index);
        }

        let columns: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
        let markers: Vec<String> = columns.iter().map(|c| format!(":{}", c)).collect();
        let mut query = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name.qualified_name(),
            columns.join(","),
            markers.join(",")
        );
        if schema.write_timestamp {
            query.push_str(&format!(" USING TIMESTAMP :{}", TIMESTAMP_VARIABLE));
            variables.push(ColumnDefinition::new(TIMESTAMP_VARIABLE, CqlType::Bigint));
        }

        debug!("Prepared {}", query);
        Ok(PreparedStatement::new(
            name,
            query,
            variables,
            partition_key_indices,
        ))
    }

    async fn execute(&self, statement: Statement) -> std::result::Result<(), WriteError> {
        if self.is_closed() {
            return Err(WriteError::connection("session is closed"));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.executions.fetch_add(1, Ordering::Relaxed);

        let bound: Vec<&BoundStatement> = match &statement {
            Statement::Bound(s) => vec![s],
            Statement::Batch(b) => b.statements().iter().collect(),
        };

        {
            let failing = self.failing.lock();
            if let Some(table) = bound
                .iter()
                .map(|s| s.prepared().table())
                .find(|t| failing.contains(*t))
            {
                return Err(WriteError::rejected(format!("writes to {} are failing", table)));
            }
        }

        let mut rows = self.rows.lock();
        for s in bound {
            rows.entry(s.prepared().table().clone())
                .or_default()
                .push(Self::to_row(s));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BatchStatement;
    use bytes::Bytes;
    use std::sync::Arc;

    fn users() -> KeyspaceTable {
        KeyspaceTable::new("ks", "users")
    }

    fn session() -> InMemorySession {
        InMemorySession::new().with_table(
            users(),
            &[("id", CqlType::Int), ("name", CqlType::Text), ("age", CqlType::Int)],
            &["id"],
        )
    }

    fn table_config() -> TableConfig {
        TableConfig::new("ks", "users")
            .with_column("id", "key")
            .with_column("name", "value.name")
    }

    #[tokio::test]
    async fn test_prepare_builds_insert() {
        let prepared = session().prepare(&table_config()).await.unwrap();

        assert_eq!(
            prepared.query(),
            "INSERT INTO ks.users (id,name) VALUES (:id,:name)"
        );
        assert_eq!(prepared.variables().len(), 2);
        assert_eq!(prepared.partition_key_indices(), &[0]);
        assert_eq!(prepared.table(), &users());
    }

    #[tokio::test]
    async fn test_prepare_with_write_timestamp() {
        let session = session().with_write_timestamp(&users());
        let prepared = session.prepare(&table_config()).await.unwrap();

        assert!(prepared.query().ends_with("USING TIMESTAMP :message_internal_timestamp"));
        assert_eq!(prepared.index_of(TIMESTAMP_VARIABLE), Some(2));
    }

    #[tokio::test]
    async fn test_prepare_errors() {
        let session = session();

        let unknown = TableConfig::new("ks", "nope").with_column("id", "key");
        assert!(session.prepare(&unknown).await.is_err());

        let bad_column = table_config().with_column("zip", "value.zip");
        assert!(session.prepare(&bad_column).await.is_err());

        let no_pk = TableConfig::new("ks", "users").with_column("name", "value.name");
        assert!(session.prepare(&no_pk).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_stores_rows_and_injects_failures() {
        let session = session();
        let prepared = Arc::new(session.prepare(&table_config()).await.unwrap());

        let mut first = prepared.bind();
        first.set_bytes(0, Some(Bytes::copy_from_slice(&1i32.to_be_bytes())));
        let mut second = prepared.bind();
        second.set_bytes(0, Some(Bytes::copy_from_slice(&2i32.to_be_bytes())));
        second.set_bytes(1, None);

        session
            .execute(Statement::Batch(BatchStatement::unlogged(vec![first, second])))
            .await
            .unwrap();

        let rows = session.rows(&users());
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].contains_key("name"));
        assert_eq!(rows[1]["name"], BoundValue::Null);
        assert_eq!(session.execution_count(), 1);

        session.fail_table(&users());
        let err = session
            .execute(Statement::Bound(prepared.bind()))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Rejected { .. }));
        assert_eq!(session.row_count(), 2);

        session.heal_table(&users());
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(session.execute(Statement::Bound(prepared.bind())).await.is_err());
    }
}
