// Copyright 2025
// Licensed under the Elastic License v2.0

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{Consistency, KeyspaceTable};

// =============================================================================
// Error Policy
// =============================================================================

/// Which record failures are tolerated without withholding the offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreErrors {
    /// Every failure withholds its offset
    #[default]
    None,
    /// Database write failures are tolerated, mapping failures are not
    Driver,
    /// Everything is tolerated except partition-key failures
    All,
}

impl FromStr for IgnoreErrors {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "false" => Ok(IgnoreErrors::None),
            "driver" | "database-errors-only" => Ok(IgnoreErrors::Driver),
            "all" | "true" => Ok(IgnoreErrors::All),
            other => anyhow::bail!(
                "Unsupported ignore-errors policy: '{}'. Supported: none, driver, all",
                other
            ),
        }
    }
}

impl std::fmt::Display for IgnoreErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreErrors::None => write!(f, "none"),
            IgnoreErrors::Driver => write!(f, "driver"),
            IgnoreErrors::All => write!(f, "all"),
        }
    }
}

// =============================================================================
// Table / Topic Configuration
// =============================================================================

fn default_null_to_unset() -> bool {
    true
}

/// Write configuration for one (topic, keyspace.table) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub keyspace: String,
    pub table: String,
    /// column name -> record field (`key`, `value.member`, `header.name`, ...)
    pub mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub consistency: Consistency,
    /// Leave null columns unset instead of writing tombstones
    #[serde(default = "default_null_to_unset")]
    pub null_to_unset: bool,
}

impl TableConfig {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            mapping: BTreeMap::new(),
            consistency: Consistency::default(),
            null_to_unset: true,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>, field: impl Into<String>) -> Self {
        self.mapping.insert(column.into(), field.into());
        self
    }

    pub fn with_mapping(mut self, mapping: &str) -> Result<Self> {
        self.mapping = parse_mapping(mapping)?;
        Ok(self)
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_null_to_unset(mut self, null_to_unset: bool) -> Self {
        self.null_to_unset = null_to_unset;
        self
    }

    pub fn keyspace_table(&self) -> KeyspaceTable {
        KeyspaceTable::new(self.keyspace.clone(), self.table.clone())
    }
}

/// Parses a `col1=value.f1, col2=key` mapping string.
pub fn parse_mapping(mapping: &str) -> Result<BTreeMap<String, String>> {
    let mut columns = BTreeMap::new();
    for entry in mapping.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (column, field) = entry
            .split_once('=')
            .with_context(|| format!("Invalid mapping entry '{}': expected column=field", entry))?;
        let (column, field) = (column.trim(), field.trim());
        if column.is_empty() || field.is_empty() {
            anyhow::bail!("Invalid mapping entry '{}': empty column or field", entry);
        }
        if columns
            .insert(column.to_string(), field.to_string())
            .is_some()
        {
            anyhow::bail!("Column '{}' is mapped more than once", column);
        }
    }
    Ok(columns)
}

/// Tables fed by one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub tables: Vec<TableConfig>,
}

// =============================================================================
// Global Settings
// =============================================================================

/// Task-wide knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Size of the bounded mapping pool
    pub mapping_workers: usize,
    /// Max statements grouped in one unlogged batch
    pub max_batch_records: usize,
    pub allow_extra_fields: bool,
    pub allow_missing_fields: bool,
    pub ignore_errors: IgnoreErrors,
    /// Batcher queue poll timeout
    pub poll_interval_ms: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            mapping_workers: 4,
            max_batch_records: 32,
            allow_extra_fields: true,
            allow_missing_fields: false,
            ignore_errors: IgnoreErrors::None,
            poll_interval_ms: 100,
        }
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

impl SinkSettings {
    /// Load settings from environment variables, falling back to defaults
    ///
    /// # Variables
    /// - SINK_MAPPING_WORKERS, SINK_MAX_BATCH_RECORDS, SINK_POLL_INTERVAL_MS
    /// - SINK_IGNORE_ERRORS (none | driver | all)
    /// - SINK_ALLOW_EXTRA_FIELDS, SINK_ALLOW_MISSING_FIELDS
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mapping_workers = env_parsed("SINK_MAPPING_WORKERS", defaults.mapping_workers)?;
        if mapping_workers == 0 {
            anyhow::bail!("SINK_MAPPING_WORKERS must be at least 1");
        }

        let max_batch_records = env_parsed("SINK_MAX_BATCH_RECORDS", defaults.max_batch_records)?;
        if max_batch_records == 0 {
            anyhow::bail!("SINK_MAX_BATCH_RECORDS must be at least 1");
        }

        let poll_interval_ms = env_parsed("SINK_POLL_INTERVAL_MS", defaults.poll_interval_ms)?;
        if poll_interval_ms == 0 {
            anyhow::bail!("SINK_POLL_INTERVAL_MS must be at least 1");
        }

        let ignore_errors = match env::var("SINK_IGNORE_ERRORS") {
            Ok(raw) => IgnoreErrors::from_str(&raw)?,
            Err(_) => defaults.ignore_errors,
        };

        Ok(Self {
            mapping_workers,
            max_batch_records,
            allow_extra_fields: env_parsed("SINK_ALLOW_EXTRA_FIELDS", defaults.allow_extra_fields)?,
            allow_missing_fields: env_parsed(
                "SINK_ALLOW_MISSING_FIELDS",
                defaults.allow_missing_fields,
            )?,
            ignore_errors,
            poll_interval_ms,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// Complete configuration of a sink task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(flatten)]
    pub settings: SinkSettings,
    /// topic name -> tables written from that topic
    #[serde(default)]
    pub topics: BTreeMap<String, TopicConfig>,
}

impl SinkConfig {
    pub fn new(settings: SinkSettings) -> Self {
        Self {
            settings,
            topics: BTreeMap::new(),
        }
    }

    /// Parses a JSON document of settings plus `topics`
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse sink configuration JSON")
    }

    pub fn with_table(mut self, topic: impl Into<String>, table: TableConfig) -> Self {
        self.topics.entry(topic.into()).or_default().tables.push(table);
        self
    }

    pub fn tables_for(&self, topic: &str) -> Option<&[TableConfig]> {
        self.topics.get(topic).map(|t| t.tables.as_slice())
    }
}

// =============================================================================
// Tests
// =============================================================================
