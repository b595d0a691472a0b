// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Buffering of objects whose graph is still being built
//!
//! While a broker materializes an object graph, new objects must be visible
//! to the broker itself (so cyclic references resolve to the same instance)
//! but must not reach a shared tier until their references are complete.
//! [`MaterializationCache`] wraps the broker's real cache: while at least one
//! [`MaterializationScope`] is open, writes go to a local buffer that is
//! flushed when the outermost scope finishes.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::{CacheEntryType, ObjectCache, ObjectCacheInternal};
use crate::identity::Identity;
use crate::object::ObjectRef;

struct Buffered {
    object: ObjectRef,
    entry_type: CacheEntryType,
    only_if_new: bool,
}

#[derive(Default)]
struct LocalState {
    depth: usize,
    order: Vec<Identity>,
    buffer: HashMap<Identity, Buffered>,
}

impl LocalState {
    fn insert(&mut self, identity: &Identity, entry: Buffered) {
        if self.buffer.insert(identity.clone(), entry).is_none() {
            self.order.push(identity.clone());
        }
    }

    fn take(&mut self) -> Vec<(Identity, Buffered)> {
        let mut buffer = std::mem::take(&mut self.buffer);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|identity| buffer.remove(&identity).map(|entry| (identity, entry)))
            .collect()
    }
}

/// Cache wrapper owned by one broker
pub struct MaterializationCache<C: ObjectCacheInternal> {
    real: C,
    state: Mutex<LocalState>,
}

impl<C: ObjectCacheInternal> MaterializationCache<C> {
    pub fn new(real: C) -> Self {
        Self {
            real,
            state: Mutex::new(LocalState::default()),
        }
    }

    pub fn real(&self) -> &C {
        &self.real
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().depth > 0
    }

    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Open a materialization scope; scopes nest
    pub fn enter(&self) -> MaterializationScope<'_, C> {
        self.state.lock().depth += 1;
        MaterializationScope {
            cache: self,
            finished: false,
        }
    }

    /// Leave one level; the outermost level flushes the buffer
    fn disable(&self) {
        let flushed = {
            let mut state = self.state.lock();
            if state.depth == 0 {
                log::warn!("Materialization cache disabled more often than enabled");
                return;
            }
            state.depth -= 1;
            if state.depth > 0 {
                return;
            }
            state.take()
        };

        let mut pushed = 0;
        for (identity, entry) in flushed {
            if !entry.entry_type.is_promotable() {
                continue;
            }
            if entry.only_if_new {
                self.real.cache_if_new(&identity, &entry.object);
            } else {
                self.real
                    .do_internal_cache(&identity, &entry.object, entry.entry_type);
            }
            pushed += 1;
        }
        if pushed > 0 {
            log::debug!("Pushed {} materialized objects to the cache", pushed);
        }
    }

    /// Drop the buffer without flushing and reset nesting; used when a
    /// materialization fails part way
    pub fn force_clear(&self) {
        let mut state = self.state.lock();
        if state.depth > 0 || !state.buffer.is_empty() {
            log::debug!(
                "Discarding {} buffered objects after failed materialization",
                state.buffer.len()
            );
        }
        state.depth = 0;
        state.buffer.clear();
        state.order.clear();
    }

    fn buffered(&self, identity: &Identity) -> Option<ObjectRef> {
        let state = self.state.lock();
        if state.depth == 0 {
            return None;
        }
        state.buffer.get(identity).map(|entry| entry.object.clone())
    }

    /// Buffer the entry if a scope is open; returns false when passed through
    fn try_buffer(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType, only_if_new: bool) -> bool {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return false;
        }
        state.insert(
            identity,
            Buffered {
                object: object.clone(),
                entry_type,
                only_if_new,
            },
        );
        true
    }
}

/// Open materialization level
///
/// Call [`finish`](Self::finish) once the graph is complete. A scope dropped
/// without finishing (an error was propagated with `?`) discards the buffer.
pub struct MaterializationScope<'a, C: ObjectCacheInternal> {
    cache: &'a MaterializationCache<C>,
    finished: bool,
}

impl<C: ObjectCacheInternal> MaterializationScope<'_, C> {
    pub fn finish(mut self) {
        self.finished = true;
        self.cache.disable();
    }
}

impl<C: ObjectCacheInternal> Drop for MaterializationScope<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.force_clear();
        }
    }
}

impl<C: ObjectCacheInternal> ObjectCache for MaterializationCache<C> {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        self.do_internal_cache(identity, object, CacheEntryType::Unknown);
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        if !self.is_enabled() {
            return self.real.cache_if_new(identity, object);
        }
        if self.buffered(identity).is_some() || self.real.lookup(identity).is_some() {
            return false;
        }
        self.try_buffer(identity, object, CacheEntryType::Unknown, true)
            || self.real.cache_if_new(identity, object)
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        self.buffered(identity)
            .or_else(|| self.real.lookup(identity))
    }

    fn remove(&self, identity: &Identity) {
        {
            let mut state = self.state.lock();
            if state.buffer.remove(identity).is_some() {
                state.order.retain(|id| id != identity);
            }
        }
        self.real.remove(identity);
    }

    fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.buffer.clear();
            state.order.clear();
        }
        self.real.clear();
    }
}

impl<C: ObjectCacheInternal> ObjectCacheInternal for MaterializationCache<C> {
    fn do_internal_cache(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType) {
        if !self.try_buffer(identity, object, entry_type, false) {
            self.real.do_internal_cache(identity, object, entry_type);
        }
    }

    fn name(&self) -> &'static str {
        "materialization"
    }
}
