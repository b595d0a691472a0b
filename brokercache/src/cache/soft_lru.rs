// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared soft map fronted by a bounded hard-reference LRU queue
//!
//! The `max_entries` most recently used objects are pinned by the hard
//! queue. Older entries stay reachable through their soft references until
//! memory pressure reclaims them.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use super::cache_config::{TierConfig, IMPL_SOFT_LRU};
use super::factory::TierContext;
use super::reference::{ReclaimQueue, SoftReference};
use super::registry::SharedTable;
use super::{ObjectCache, ObjectCacheInternal};
use crate::error::PersistenceResult;
use crate::identity::Identity;
use crate::object::ObjectRef;

/// Recency order of the hard-referenced keys
///
/// Each access stamps the key with a fresh tick; the smallest tick is the
/// least recently used key.
struct LruTracker<K> {
    ticks: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
    clock: u64,
}

impl<K: Clone + Eq + Hash> LruTracker<K> {
    fn new() -> Self {
        Self {
            ticks: HashMap::new(),
            order: BTreeMap::new(),
            clock: 0,
        }
    }

    fn access(&mut self, key: &K) {
        self.clock += 1;
        if let Some(previous) = self.ticks.insert(key.clone(), self.clock) {
            self.order.remove(&previous);
        }
        self.order.insert(self.clock, key.clone());
    }

    fn remove(&mut self, key: &K) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn remove_lru(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}

struct LruState {
    soft: HashMap<Identity, SoftReference<Identity>>,
    hard: HashMap<Identity, ObjectRef>,
    lru: LruTracker<Identity>,
}

/// Table shared by every soft LRU tier of a registry
pub struct SoftLruTable {
    state: Mutex<LruState>,
    reclaimed: Arc<ReclaimQueue<Identity>>,
    max_entries: usize,
}

impl SoftLruTable {
    fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                soft: HashMap::new(),
                hard: HashMap::new(),
                lru: LruTracker::new(),
            }),
            reclaimed: Arc::new(ReclaimQueue::new()),
            max_entries,
        }
    }

    fn drain_reclaimed(&self, state: &mut LruState) {
        for key in self.reclaimed.drain() {
            if state.soft.get(&key).map_or(false, SoftReference::is_reclaimed) {
                state.soft.remove(&key);
            }
        }
    }

    /// Pin `key` as most recently used, evicting the oldest hard reference
    fn touch(&self, state: &mut LruState, key: &Identity, object: &ObjectRef) {
        state.lru.access(key);
        state.hard.insert(key.clone(), object.clone());
        while state.lru.len() > self.max_entries {
            match state.lru.remove_lru() {
                Some(evicted) => {
                    state.hard.remove(&evicted);
                }
                None => break,
            }
        }
    }

    fn put(&self, key: &Identity, object: &ObjectRef, only_if_new: bool) -> bool {
        let mut state = self.state.lock();
        self.drain_reclaimed(&mut state);
        let live = state
            .soft
            .get(key)
            .map_or(false, |soft| !soft.is_reclaimed());
        if only_if_new && live {
            return false;
        }
        state.soft.insert(
            key.clone(),
            SoftReference::new(object.clone(), key.clone(), &self.reclaimed),
        );
        self.touch(&mut state, key, object);
        true
    }

    fn get(&self, key: &Identity) -> Option<ObjectRef> {
        let mut state = self.state.lock();
        self.drain_reclaimed(&mut state);
        let object = state.soft.get(key).and_then(SoftReference::get)?;
        self.touch(&mut state, key, &object);
        Some(object)
    }

    fn remove(&self, key: &Identity) {
        let mut state = self.state.lock();
        self.drain_reclaimed(&mut state);
        state.soft.remove(key);
        state.hard.remove(key);
        state.lru.remove(key);
    }

    pub fn hard_len(&self) -> usize {
        self.state.lock().hard.len()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

impl SharedTable for SoftLruTable {
    fn reclaim_unreferenced(&self) -> usize {
        // Hard-queued objects hold a second strong handle and survive this
        self.state
            .lock()
            .soft
            .values()
            .filter(|soft| soft.reclaim_if_unreferenced())
            .count()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.soft.clear();
        state.hard.clear();
        state.lru.clear();
        self.reclaimed.drain();
    }

    fn len(&self) -> usize {
        let mut state = self.state.lock();
        self.drain_reclaimed(&mut state);
        state.soft.len()
    }
}

pub struct SoftLruCache {
    table: Arc<SoftLruTable>,
}

impl SoftLruCache {
    pub fn new(ctx: &TierContext, config: &TierConfig, table_name: &str) -> PersistenceResult<Self> {
        let table = ctx
            .registry
            .shared(table_name, || SoftLruTable::new(config.max_entries))?;
        if table.max_entries() != config.max_entries {
            log::warn!(
                "Soft LRU table '{}' already exists with max_entries {}, ignoring {}",
                table_name,
                table.max_entries(),
                config.max_entries
            );
        }
        Ok(Self { table })
    }

    pub fn hard_len(&self) -> usize {
        self.table.hard_len()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl ObjectCache for SoftLruCache {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        self.table.put(identity, object, false);
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        self.table.put(identity, object, true)
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        self.table.get(identity)
    }

    fn remove(&self, identity: &Identity) {
        self.table.remove(identity);
    }

    fn clear(&self) {
        self.table.clear();
    }
}

impl ObjectCacheInternal for SoftLruCache {
    fn name(&self) -> &'static str {
        IMPL_SOFT_LRU
    }
}
