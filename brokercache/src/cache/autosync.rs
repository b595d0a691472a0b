// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rollback eviction for shared tables
//!
//! Every key a tier touches while its broker is inside a transaction is
//! traced. If the transaction rolls back, the traced keys are evicted from
//! the shared table so other brokers do not see uncommitted state. This is
//! best effort: another broker may already have read the entry.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::key::CacheKey;
use super::table::ObjectTable;
use crate::broker::{BrokerEvent, BrokerListener, PersistenceBroker};
use crate::error::PersistenceResult;

/// Per-broker trace of keys touched inside the running transaction
pub struct AutoSyncTracer {
    table: Arc<ObjectTable<CacheKey>>,
    traced: Mutex<HashSet<CacheKey>>,
    registered: AtomicBool,
}

impl AutoSyncTracer {
    pub fn new(table: Arc<ObjectTable<CacheKey>>) -> Arc<Self> {
        Arc::new(Self {
            table,
            traced: Mutex::new(HashSet::new()),
            registered: AtomicBool::new(false),
        })
    }

    /// Record `key` if the broker is inside a transaction
    pub fn trace(self: &Arc<Self>, key: &CacheKey, broker: &PersistenceBroker) {
        if !broker.is_in_transaction() {
            return;
        }
        self.traced.lock().insert(key.clone());
        if !self.registered.swap(true, Ordering::SeqCst) {
            // Temporary listeners are dropped when the transaction ends
            broker.add_listener(Arc::clone(self) as Arc<dyn BrokerListener>, false);
        }
    }

    pub fn traced_len(&self) -> usize {
        self.traced.lock().len()
    }

    fn take_traced(&self) -> Vec<CacheKey> {
        self.registered.store(false, Ordering::SeqCst);
        self.traced.lock().drain().collect()
    }
}

impl BrokerListener for AutoSyncTracer {
    fn on_event(&self, event: BrokerEvent, broker: &PersistenceBroker) -> PersistenceResult<()> {
        match event {
            BrokerEvent::AfterRollback => {
                let keys = self.take_traced();
                for key in &keys {
                    self.table.remove(key);
                }
                log::info!(
                    "Rollback on broker {} evicted {} traced cache entries",
                    broker.pb_key(),
                    keys.len()
                );
            }
            BrokerEvent::AfterCommit => {
                self.take_traced();
            }
            _ => {}
        }
        Ok(())
    }
}
