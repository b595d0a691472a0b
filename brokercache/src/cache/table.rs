// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Keyed object table with expiry, soft references and entry types
//!
//! Backing store of the default, per-broker and two-level tiers. Every
//! access first drains the reclamation queue so reclaimed entries never
//! linger, and an expired or reclaimed entry met on lookup is evicted and
//! reported as a miss.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::reference::{CachedReference, ReclaimQueue};
use super::registry::SharedTable;
use super::CacheEntryType;
use crate::object::ObjectRef;

/// How a single entry is stored
#[derive(Debug, Clone, Copy)]
pub struct EntryOptions {
    pub soft: bool,
    /// `None` never expires
    pub lifetime: Option<Duration>,
    pub entry_type: CacheEntryType,
}

impl EntryOptions {
    pub fn new(soft: bool, lifetime: Option<Duration>) -> Self {
        Self {
            soft,
            lifetime,
            entry_type: CacheEntryType::Unknown,
        }
    }

    pub fn with_type(mut self, entry_type: CacheEntryType) -> Self {
        self.entry_type = entry_type;
        self
    }
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self::new(true, None)
    }
}

#[derive(Debug)]
struct TableEntry<K: Clone> {
    reference: CachedReference<K>,
    expires_at: Option<Instant>,
    entry_type: CacheEntryType,
}

impl<K: Clone> TableEntry<K> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now > at)
    }

    fn live_object(&self, now: Instant) -> Option<ObjectRef> {
        if self.is_expired(now) {
            None
        } else {
            self.reference.get()
        }
    }
}

/// Map from key to cached object
#[derive(Debug)]
pub struct ObjectTable<K: Clone + Eq + Hash> {
    entries: Mutex<HashMap<K, TableEntry<K>>>,
    reclaimed: Arc<ReclaimQueue<K>>,
}

impl<K: Clone + Eq + Hash> Default for ObjectTable<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reclaimed: Arc::new(ReclaimQueue::new()),
        }
    }
}

impl<K: Clone + Eq + Hash> ObjectTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K, object: &ObjectRef, options: EntryOptions) -> TableEntry<K> {
        TableEntry {
            reference: CachedReference::new(object.clone(), key.clone(), options.soft, &self.reclaimed),
            // A lifetime past the end of the clock means the entry never expires
            expires_at: options
                .lifetime
                .and_then(|lifetime| Instant::now().checked_add(lifetime)),
            entry_type: options.entry_type,
        }
    }

    fn drain_reclaimed(&self, entries: &mut HashMap<K, TableEntry<K>>) {
        for key in self.reclaimed.drain() {
            // A newer live entry may have replaced the reclaimed one
            let dead = entries
                .get(&key)
                .map_or(false, |entry| !entry.reference.is_live());
            if dead {
                entries.remove(&key);
            }
        }
    }

    /// Insert or overwrite
    pub fn put(&self, key: K, object: &ObjectRef, options: EntryOptions) {
        let entry = self.entry(&key, object, options);
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        entries.insert(key, entry);
    }

    /// Insert unless a live entry exists; atomic with respect to other callers
    pub fn put_if_absent(&self, key: K, object: &ObjectRef, options: EntryOptions) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        if entries
            .get(&key)
            .map_or(false, |entry| entry.live_object(now).is_some())
        {
            return false;
        }
        let entry = self.entry(&key, object, options);
        entries.insert(key, entry);
        true
    }

    pub fn get(&self, key: &K) -> Option<ObjectRef> {
        self.get_with_type(key).map(|(object, _)| object)
    }

    pub fn get_with_type(&self, key: &K) -> Option<(ObjectRef, CacheEntryType)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        let found = entries
            .get(key)
            .map(|entry| (entry.live_object(now), entry.entry_type));
        match found {
            Some((Some(object), entry_type)) => Some((object, entry_type)),
            Some((None, _)) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get_with_type(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<ObjectRef> {
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        entries.remove(key).and_then(|entry| entry.reference.get())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.reclaimed.drain();
    }

    /// Change the type tag of an existing entry
    pub fn retag(&self, key: &K, entry_type: CacheEntryType) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                entry.entry_type = entry_type;
                true
            }
            None => false,
        }
    }

    /// Live entries carrying `entry_type`
    pub fn entries_of_type(&self, entry_type: CacheEntryType) -> Vec<(K, ObjectRef)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        entries
            .iter()
            .filter(|(_, entry)| entry.entry_type == entry_type)
            .filter_map(|(key, entry)| entry.live_object(now).map(|obj| (key.clone(), obj)))
            .collect()
    }

    /// Drop every entry carrying `entry_type`; returns how many were dropped
    pub fn remove_type(&self, entry_type: CacheEntryType) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.entry_type != entry_type);
        before - entries.len()
    }

    /// Reclaim one entry as if the runtime had collected it
    pub fn reclaim(&self, key: &K) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |entry| entry.reference.reclaim())
    }

    pub fn pending_reclaims(&self) -> usize {
        self.reclaimed.len()
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.drain_reclaimed(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clone + Eq + Hash + Send + Sync> SharedTable for ObjectTable<K> {
    fn reclaim_unreferenced(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.reference.reclaim_if_unreferenced())
            .count()
    }

    fn clear(&self) {
        ObjectTable::clear(self);
    }

    fn len(&self) -> usize {
        ObjectTable::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PersistentObject;
    use std::thread;

    fn object(id: i64) -> ObjectRef {
        ObjectRef::new(PersistentObject::new("a.B").with_field("id", id))
    }

    #[test]
    fn test_put_get_overwrite() {
        let table = ObjectTable::new();
        let first = object(1);
        let second = object(1);
        table.put(1, &first, EntryOptions::default());
        assert!(table.get(&1).unwrap().ptr_eq(&first));
        table.put(1, &second, EntryOptions::default());
        assert!(table.get(&1).unwrap().ptr_eq(&second));
    }

    #[test]
    fn test_put_if_absent_keeps_first() {
        let table = ObjectTable::new();
        let first = object(1);
        assert!(table.put_if_absent(1, &first, EntryOptions::default()));
        assert!(!table.put_if_absent(1, &object(1), EntryOptions::default()));
        assert!(table.get(&1).unwrap().ptr_eq(&first));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_lookup() {
        let table = ObjectTable::new();
        let held = object(1);
        table.put(1, &held, EntryOptions::new(false, Some(Duration::ZERO)));
        thread::sleep(Duration::from_millis(5));

        assert!(table.get(&1).is_none());
        assert_eq!(table.len(), 0);
        // Removing again is a harmless no-op
        assert!(table.remove(&1).is_none());
        // An expired entry does not block put_if_absent
        assert!(table.put_if_absent(1, &held, EntryOptions::default()));
    }

    #[test]
    fn test_unbounded_lifetime_never_expires() {
        let table = ObjectTable::new();
        let held = object(1);
        table.put(1, &held, EntryOptions::new(false, Some(Duration::MAX)));
        assert!(table.get(&1).unwrap().ptr_eq(&held));
        assert!(!table.put_if_absent(1, &object(1), EntryOptions::new(false, Some(Duration::MAX))));
    }

    #[test]
    fn test_reclaimed_entries_are_drained() {
        let table = ObjectTable::new();
        table.put(1, &object(1), EntryOptions::default());
        table.put(2, &object(2), EntryOptions::default());
        let kept = object(3);
        table.put(3, &kept, EntryOptions::default());

        assert_eq!(table.reclaim_unreferenced(), 2);
        assert_eq!(table.pending_reclaims(), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending_reclaims(), 0);
        assert!(table.get(&3).is_some());
    }

    #[test]
    fn test_type_tags() {
        let table = ObjectTable::new();
        let a = object(1);
        let b = object(2);
        let c = object(3);
        let write = EntryOptions::default().with_type(CacheEntryType::Write);
        table.put("a", &a, write);
        table.put("b", &b, EntryOptions::default().with_type(CacheEntryType::Temp));
        table.put("c", &c, write);

        assert_eq!(table.entries_of_type(CacheEntryType::Write).len(), 2);
        assert!(table.retag(&"a", CacheEntryType::CachedRead));
        assert_eq!(table.entries_of_type(CacheEntryType::Write).len(), 1);
        assert_eq!(table.remove_type(CacheEntryType::Temp), 1);
        assert_eq!(
            table.get_with_type(&"a").map(|(_, t)| t),
            Some(CacheEntryType::CachedRead)
        );
    }
}
