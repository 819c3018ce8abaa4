// Copyright 2025
// Licensed under the Elastic License v2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Offsets the log infrastructure is about to commit, one per partition
pub type OffsetMap = HashMap<TopicPartition, i64>;

/// A partition of a topic in the source log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
