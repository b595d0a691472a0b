// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Store interface consumed by the broker
//!
//! SQL generation and statement execution live behind [`ObjectStore`]; the
//! broker only needs to fetch a row by identity, run a defining query, and
//! count what a query would return.

pub mod memory;

pub use memory::InMemoryStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PersistenceResult;
use crate::identity::{ClassName, Identity};
use crate::value::Value;

/// One stored row: the concrete class plus its column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub class: ClassName,
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self {
            class: class.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Equality-conjunction query over a class extent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub target_class: ClassName,
    pub criteria: Vec<(String, Value)>,
}

impl Query {
    pub fn new(target_class: impl Into<ClassName>) -> Self {
        Self {
            target_class: target_class.into(),
            criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.criteria.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.criteria
            .iter()
            .all(|(field, value)| row.values.get(field) == Some(value))
    }
}

/// Opaque persistent store
pub trait ObjectStore: Send + Sync {
    /// Row for an identity, `None` if it does not exist
    fn materialize(&self, identity: &Identity) -> PersistenceResult<Option<Row>>;

    /// All rows of the query's extent (subclasses included) matching it
    fn query(&self, query: &Query) -> PersistenceResult<Vec<Row>>;

    /// Number of rows `query` would return, without fetching them
    fn count(&self, query: &Query) -> PersistenceResult<usize>;

    /// Insert or update a row
    fn write(&self, identity: &Identity, row: Row) -> PersistenceResult<()>;

    fn delete(&self, identity: &Identity) -> PersistenceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches_all_criteria() {
        let row = Row::new("shop.Article")
            .with("group_id", 3)
            .with("name", "pen");
        assert!(Query::new("shop.Article").matches(&row));
        assert!(Query::new("shop.Article")
            .with_criterion("group_id", 3)
            .matches(&row));
        assert!(!Query::new("shop.Article")
            .with_criterion("group_id", 3)
            .with_criterion("name", "ink")
            .matches(&row));
    }
}
