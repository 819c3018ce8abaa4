// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod memory;

pub use memory::{InMemorySession, Row};
