// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory store implementation for testing and embedded use

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ObjectStore, Query, Row};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{ClassName, Identity};
use crate::metadata::DescriptorRepository;
use crate::value::Value;

/// Rows are keyed by top-level class and primary key, so an identity built
/// against a superclass still finds a subclass row.
type RowKey = (ClassName, Vec<Value>);

/// In-memory store with call counters
pub struct InMemoryStore {
    repository: Arc<DescriptorRepository>,
    rows: Arc<RwLock<HashMap<RowKey, Row>>>,
    materialize_calls: AtomicUsize,
    query_calls: AtomicUsize,
    count_calls: AtomicUsize,
    failures_pending: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(repository: Arc<DescriptorRepository>) -> Self {
        Self {
            repository,
            rows: Arc::new(RwLock::new(HashMap::new())),
            materialize_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            failures_pending: AtomicUsize::new(0),
        }
    }

    /// Seed a row without going through a broker
    pub fn insert(&self, row: Row) -> PersistenceResult<Identity> {
        let identity = self.repository.identity_of_row(&row)?;
        self.rows.write().insert(Self::key(&identity), row);
        Ok(identity)
    }

    pub fn row(&self, identity: &Identity) -> Option<Row> {
        self.rows.read().get(&Self::key(identity)).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn materialize_calls(&self) -> usize {
        self.materialize_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.materialize_calls.store(0, Ordering::SeqCst);
        self.query_calls.store(0, Ordering::SeqCst);
        self.count_calls.store(0, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail with a store error
    pub fn fail_next(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    fn key(identity: &Identity) -> RowKey {
        (
            identity.top_level_class().clone(),
            identity.pk_values().to_vec(),
        )
    }

    fn check_failure(&self, operation: &str) -> PersistenceResult<()> {
        let consumed = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(PersistenceError::Store(format!(
                "Injected failure during {}",
                operation
            ))),
            Err(_) => Ok(()),
        }
    }

    fn matching_rows(&self, query: &Query) -> Vec<Row> {
        let rows = self.rows.read();
        let mut matching: Vec<Row> = rows
            .values()
            .filter(|row| self.repository.is_assignable(&query.target_class, &row.class))
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        // HashMap order is arbitrary, keep results stable for callers
        matching.sort_by(|a, b| {
            let a_key = format!("{:?}", a.values);
            let b_key = format!("{:?}", b.values);
            a.class.cmp(&b.class).then(a_key.cmp(&b_key))
        });
        matching
    }
}

impl ObjectStore for InMemoryStore {
    fn materialize(&self, identity: &Identity) -> PersistenceResult<Option<Row>> {
        self.materialize_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("materialize")?;

        let row = self.rows.read().get(&Self::key(identity)).cloned();
        Ok(row.filter(|row| {
            self.repository
                .is_assignable(identity.real_class(), &row.class)
        }))
    }

    fn query(&self, query: &Query) -> PersistenceResult<Vec<Row>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("query")?;
        Ok(self.matching_rows(query))
    }

    fn count(&self, query: &Query) -> PersistenceResult<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("count")?;
        Ok(self.matching_rows(query).len())
    }

    fn write(&self, identity: &Identity, row: Row) -> PersistenceResult<()> {
        if identity.is_transient() {
            return Err(PersistenceError::Store(format!(
                "Cannot write {} without a complete primary key",
                identity
            )));
        }
        self.rows.write().insert(Self::key(identity), row);
        Ok(())
    }

    fn delete(&self, identity: &Identity) -> PersistenceResult<()> {
        self.rows.write().remove(&Self::key(identity));
        Ok(())
    }
}
