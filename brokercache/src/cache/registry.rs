// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Process-lifetime home of shared tier state
//!
//! Tiers that share entries across brokers (the default tier, the soft LRU
//! tier, application caches) look their table up here by name. The registry
//! is created explicitly by the broker factory and torn down with
//! [`CacheRegistry::shutdown`], so tests can run isolated registries side by
//! side.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::{PersistenceError, PersistenceResult};

/// Table whose entries may be reclaimed or dropped by the registry
pub trait SharedTable: Send + Sync {
    /// Reclaim soft entries whose objects nobody outside the cache holds
    fn reclaim_unreferenced(&self) -> usize;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct NamedTable {
    any: Arc<dyn Any + Send + Sync>,
    table: Arc<dyn SharedTable>,
}

/// Registry of named shared tables
pub struct CacheRegistry {
    tables: Mutex<HashMap<String, NamedTable>>,
    // Broker-private tables, tracked only for memory pressure
    private: Mutex<Vec<Weak<dyn SharedTable>>>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            private: Mutex::new(Vec::new()),
        }
    }
}

impl CacheRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Shared table registered under `name`, created by `init` on first use
    pub fn shared<T, F>(&self, name: &str, init: F) -> PersistenceResult<Arc<T>>
    where
        T: SharedTable + Any,
        F: FnOnce() -> T,
    {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(name) {
            return Arc::clone(&existing.any).downcast::<T>().map_err(|_| {
                PersistenceError::Configuration(format!(
                    "Shared cache table '{}' is already registered with a different type",
                    name
                ))
            });
        }

        let table = Arc::new(init());
        let any: Arc<dyn Any + Send + Sync> = table.clone();
        let shared: Arc<dyn SharedTable> = table.clone();
        tables.insert(name.to_string(), NamedTable { any, table: shared });
        log::debug!("Registered shared cache table '{}'", name);
        Ok(table)
    }

    /// Track a broker-private table so memory pressure reaches it too
    pub fn register_private(&self, table: Weak<dyn SharedTable>) {
        let mut private = self.private.lock();
        private.retain(|t| t.strong_count() > 0);
        private.push(table);
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Simulate the runtime reclaiming memory: every soft entry whose object is
    /// held by nobody but the cache is cleared. Returns the number cleared.
    pub fn memory_pressure(&self) -> usize {
        let mut targets: Vec<Arc<dyn SharedTable>> = self
            .tables
            .lock()
            .values()
            .map(|t| Arc::clone(&t.table))
            .collect();
        {
            let mut private = self.private.lock();
            private.retain(|t| t.strong_count() > 0);
            targets.extend(private.iter().filter_map(Weak::upgrade));
        }

        let reclaimed: usize = targets.iter().map(|t| t.reclaim_unreferenced()).sum();
        log::debug!("Memory pressure reclaimed {} cache entries", reclaimed);
        reclaimed
    }

    /// Clear every table and forget all registrations
    pub fn shutdown(&self) {
        let tables: Vec<NamedTable> = self.tables.lock().drain().map(|(_, t)| t).collect();
        let private: Vec<Weak<dyn SharedTable>> = self.private.lock().drain(..).collect();
        for table in &tables {
            table.table.clear();
        }
        for table in private.iter().filter_map(Weak::upgrade) {
            table.clear();
        }
        log::info!("Cache registry shut down ({} shared tables)", tables.len());
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("tables", &self.table_names())
            .finish()
    }
}
