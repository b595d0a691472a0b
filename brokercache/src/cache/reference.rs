// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reclaimable references
//!
//! A [`SoftReference`] keeps its object reachable until it is reclaimed.
//! Reclamation is an explicit event (memory pressure reported through the
//! [`CacheRegistry`](super::CacheRegistry), or a direct [`SoftReference::reclaim`]
//! call) and pushes the entry's key onto a [`ReclaimQueue`] that the owning
//! table drains on its next access.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::object::ObjectRef;

/// Keys of entries whose reference was reclaimed
#[derive(Debug)]
pub struct ReclaimQueue<K> {
    keys: Mutex<VecDeque<K>>,
}

impl<K> Default for ReclaimQueue<K> {
    fn default() -> Self {
        Self {
            keys: Mutex::new(VecDeque::new()),
        }
    }
}

impl<K> ReclaimQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: K) {
        self.keys.lock().push_back(key);
    }

    pub fn drain(&self) -> Vec<K> {
        self.keys.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

/// Reference the cache holds on an object until it is reclaimed
#[derive(Debug)]
pub struct SoftReference<K: Clone> {
    referent: Mutex<Option<ObjectRef>>,
    key: K,
    queue: Arc<ReclaimQueue<K>>,
}

impl<K: Clone> SoftReference<K> {
    pub fn new(object: ObjectRef, key: K, queue: &Arc<ReclaimQueue<K>>) -> Self {
        Self {
            referent: Mutex::new(Some(object)),
            key,
            queue: Arc::clone(queue),
        }
    }

    pub fn get(&self) -> Option<ObjectRef> {
        self.referent.lock().clone()
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn is_reclaimed(&self) -> bool {
        self.referent.lock().is_none()
    }

    /// Clear the reference and enqueue its key; false if already cleared
    pub fn reclaim(&self) -> bool {
        let cleared = self.referent.lock().take();
        match cleared {
            Some(_) => {
                self.queue.push(self.key.clone());
                true
            }
            None => false,
        }
    }

    /// Reclaim only when this reference is the object's last holder
    pub fn reclaim_if_unreferenced(&self) -> bool {
        let mut referent = self.referent.lock();
        let unreferenced = referent.as_ref().map_or(false, |obj| obj.holders() == 1);
        if unreferenced {
            *referent = None;
            drop(referent);
            self.queue.push(self.key.clone());
        }
        unreferenced
    }
}

/// How a table entry holds its object
#[derive(Debug)]
pub enum CachedReference<K: Clone> {
    Strong(ObjectRef),
    Soft(SoftReference<K>),
}

impl<K: Clone> CachedReference<K> {
    pub fn new(object: ObjectRef, key: K, soft: bool, queue: &Arc<ReclaimQueue<K>>) -> Self {
        if soft {
            CachedReference::Soft(SoftReference::new(object, key, queue))
        } else {
            CachedReference::Strong(object)
        }
    }

    pub fn get(&self) -> Option<ObjectRef> {
        match self {
            CachedReference::Strong(obj) => Some(obj.clone()),
            CachedReference::Soft(soft) => soft.get(),
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            CachedReference::Strong(_) => true,
            CachedReference::Soft(soft) => !soft.is_reclaimed(),
        }
    }

    pub fn reclaim_if_unreferenced(&self) -> bool {
        match self {
            CachedReference::Strong(_) => false,
            CachedReference::Soft(soft) => soft.reclaim_if_unreferenced(),
        }
    }

    pub fn reclaim(&self) -> bool {
        match self {
            CachedReference::Strong(_) => false,
            CachedReference::Soft(soft) => soft.reclaim(),
        }
    }
}
