// Copyright 2025
// Licensed under the Elastic License v2.0

//! Field addressing over a [`SinkRecord`].
//!
//! ```text
//!   key                  whole key (primitive, or a struct as JSON)
//!   key.<member>         struct member of the key, dotted for nesting
//!   value                whole value
//!   value.<member>       struct member of the value
//!   header.<name>        a record header
//! ```

use crate::core::{SinkRecord, Value};

pub const KEY: &str = "key";
pub const VALUE: &str = "value";
pub const HEADER: &str = "header";

/// Read-only field view of one record
#[derive(Debug, Clone, Copy)]
pub struct KeyValueRecord<'a> {
    record: &'a SinkRecord,
}

impl<'a> KeyValueRecord<'a> {
    pub fn new(record: &'a SinkRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &'a SinkRecord {
        self.record
    }

    /// Top-level fields carried by the record.
    ///
    /// Struct roots contribute one field per member; any other present root
    /// contributes itself. An absent key or value contributes nothing.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        root_fields(KEY, self.record.key.as_ref(), &mut fields);
        root_fields(VALUE, self.record.value.as_ref(), &mut fields);
        for header in &self.record.headers {
            fields.push(format!("{}.{}", HEADER, header.name));
        }
        fields
    }

    /// Resolves a field name to its value, `None` when the record lacks it.
    pub fn field_value(&self, field: &str) -> Option<&'a Value> {
        let (root, path) = match field.split_once('.') {
            Some((root, path)) => (root, Some(path)),
            None => (field, None),
        };

        match root {
            KEY => resolve(self.record.key.as_ref()?, path),
            VALUE => resolve(self.record.value.as_ref()?, path),
            HEADER => {
                let name = path?;
                self.record
                    .headers
                    .iter()
                    .find(|h| h.name == name)
                    .map(|h| &h.value)
            }
            _ => None,
        }
    }

    /// Record timestamp in epoch milliseconds
    pub fn timestamp(&self) -> Option<i64> {
        self.record.timestamp
    }
}

fn root_fields(root: &str, value: Option<&Value>, out: &mut Vec<String>) {
    match value {
        Some(Value::Struct(members)) => {
            out.extend(members.keys().map(|m| format!("{}.{}", root, m)));
        }
        Some(_) => out.push(root.to_string()),
        None => {}
    }
}

fn resolve<'a>(root: &'a Value, path: Option<&str>) -> Option<&'a Value> {
    match path {
        None => Some(root),
        Some(path) => root.member(path),
    }
}
