// Copyright 2025
// Licensed under the Elastic License v2.0

//! Record to bound-statement mapping.
//!
//! One [`RecordMapper`] exists per configured table. It is immutable after
//! construction and shared by every mapping task of a batch.

pub mod codec;
pub mod fields;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::{SinkSettings, TableConfig};
use crate::core::{
    BoundStatement, Consistency, CqlType, MappingError, PreparedStatement, ValueCodec,
    TIMESTAMP_VARIABLE,
};

pub use codec::StandardCodec;
pub use fields::KeyValueRecord;

/// Bidirectional column/field mapping of one table
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    column_to_field: BTreeMap<String, String>,
    field_to_columns: HashMap<String, Vec<String>>,
}

impl Mapping {
    pub fn new(column_to_field: &BTreeMap<String, String>) -> Self {
        let mut field_to_columns: HashMap<String, Vec<String>> = HashMap::new();
        for (column, field) in column_to_field {
            field_to_columns
                .entry(field.clone())
                .or_default()
                .push(column.clone());
        }
        Self {
            column_to_field: column_to_field.clone(),
            field_to_columns,
        }
    }

    pub fn field_for(&self, column: &str) -> Option<&str> {
        self.column_to_field.get(column).map(String::as_str)
    }

    pub fn columns_for(&self, field: &str) -> &[String] {
        self.field_to_columns
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a top-level record field feeds at least one column, either
    /// directly or through a nested member path below it.
    pub fn is_mapped(&self, record_field: &str) -> bool {
        if self.field_to_columns.contains_key(record_field) {
            return true;
        }
        self.field_to_columns.keys().any(|f| {
            f.strip_prefix(record_field)
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.column_to_field
            .iter()
            .map(|(c, f)| (c.as_str(), f.as_str()))
    }
}

/// Maps records into bound statements for one table
pub struct RecordMapper {
    prepared: Arc<PreparedStatement>,
    mapping: Mapping,
    codec: Arc<dyn ValueCodec>,
    consistency: Consistency,
    null_to_unset: bool,
    allow_extra_fields: bool,
    allow_missing_fields: bool,
}

impl RecordMapper {
    pub fn new(
        prepared: Arc<PreparedStatement>,
        table: &TableConfig,
        settings: &SinkSettings,
        codec: Arc<dyn ValueCodec>,
    ) -> Self {
        Self {
            prepared,
            mapping: Mapping::new(&table.mapping),
            codec,
            consistency: table.consistency,
            null_to_unset: table.null_to_unset,
            allow_extra_fields: settings.allow_extra_fields,
            allow_missing_fields: settings.allow_missing_fields,
        }
    }

    pub fn prepared(&self) -> &Arc<PreparedStatement> {
        &self.prepared
    }

    /// Builds the bound statement for one record.
    ///
    /// # Errors
    /// Any [`MappingError`] other than `UnknownTopic`. Partition-key errors
    /// are raised even when missing fields are allowed.
    pub fn map(&self, record: &KeyValueRecord<'_>) -> Result<BoundStatement, MappingError> {
        if !self.allow_missing_fields {
            self.ensure_all_fields_present(record)?;
        }
        if !self.allow_extra_fields {
            if let Some(field) = record.fields().into_iter().find(|f| !self.mapping.is_mapped(f)) {
                return Err(MappingError::ExtraneousField { field });
            }
        }

        let mut bound = self.prepared.bind();
        bound.set_consistency(self.consistency);

        for (column, field) in self.mapping.entries() {
            let Some(index) = self.prepared.index_of(column) else {
                continue;
            };
            let Some(raw) = record.field_value(field) else {
                continue;
            };
            let cql_type = self.prepared.variables()[index].cql_type;
            let encoded =
                self.codec
                    .encode(raw, &cql_type)
                    .map_err(|source| MappingError::Conversion {
                        field: field.to_string(),
                        column: column.to_string(),
                        source,
                    })?;
            self.bind_column(&mut bound, index, column, encoded, cql_type)?;
        }

        if let Some(millis) = record.timestamp() {
            if let Some(index) = self.prepared.index_of(TIMESTAMP_VARIABLE) {
                let micros = millis.saturating_mul(1000);
                bound.set_bytes(index, Some(Bytes::copy_from_slice(&micros.to_be_bytes())));
            }
        }

        self.ensure_partition_key_set(&bound)?;
        Ok(bound)
    }

    fn bind_column(
        &self,
        bound: &mut BoundStatement,
        index: usize,
        column: &str,
        encoded: Option<Bytes>,
        cql_type: CqlType,
    ) -> Result<(), MappingError> {
        if is_null(encoded.as_ref(), cql_type) {
            if self.is_partition_key(index) {
                return Err(MappingError::PartitionKeyNull {
                    column: column.to_string(),
                });
            }
            if self.null_to_unset {
                return Ok(());
            }
        }
        bound.set_bytes(index, encoded);
        Ok(())
    }

    fn is_partition_key(&self, index: usize) -> bool {
        self.prepared.partition_key_indices().contains(&index)
    }

    fn ensure_all_fields_present(&self, record: &KeyValueRecord<'_>) -> Result<(), MappingError> {
        for (index, variable) in self.prepared.variables().iter().enumerate() {
            if variable.name == TIMESTAMP_VARIABLE {
                continue;
            }
            let Some(field) = self.mapping.field_for(&variable.name) else {
                continue;
            };
            if record.field_value(field).is_none() {
                if self.is_partition_key(index) {
                    return Err(MappingError::PartitionKeyUnset {
                        column: variable.name.clone(),
                    });
                }
                return Err(MappingError::MissingField {
                    field: field.to_string(),
                    column: variable.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn ensure_partition_key_set(&self, bound: &BoundStatement) -> Result<(), MappingError> {
        for &index in self.prepared.partition_key_indices() {
            if !bound.is_set(index) {
                let column = self
                    .prepared
                    .variables()
                    .get(index)
                    .map(|v| v.name.clone())
                    .unwrap_or_else(|| format!("#{}", index));
                return Err(MappingError::PartitionKeyUnset { column });
            }
        }
        Ok(())
    }
}

/// Empty encodings are null except for textual columns, where they are
/// empty strings.
fn is_null(encoded: Option<&Bytes>, cql_type: CqlType) -> bool {
    match encoded {
        None => true,
        Some(b) if b.is_empty() => !cql_type.is_textual(),
        Some(_) => false,
    }
}
