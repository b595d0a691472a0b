// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Tier that keeps one sub-cache per real class

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::cache_config::{CacheDescriptor, TierConfig, IMPL_PER_CLASS};
use super::factory::{create_cache, TierContext};
use super::{CacheEntryType, ObjectCache, ObjectCacheInternal};
use crate::identity::{ClassName, Identity};
use crate::object::ObjectRef;

/// Routes each identity to a sub-cache of its real class, created lazily
/// from the `class_cache` implementation
pub struct PerClassCache {
    ctx: TierContext,
    class_descriptor: CacheDescriptor,
    caches: RwLock<HashMap<ClassName, Arc<dyn ObjectCacheInternal>>>,
}

impl PerClassCache {
    pub fn new(ctx: &TierContext, config: &TierConfig) -> Self {
        Self {
            ctx: ctx.clone(),
            class_descriptor: CacheDescriptor::new(config.class_cache.clone())
                .with_config(config.clone()),
            caches: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, class: &ClassName) -> Option<Arc<dyn ObjectCacheInternal>> {
        self.caches.read().get(class).cloned()
    }

    fn cache_for(&self, class: &ClassName) -> Option<Arc<dyn ObjectCacheInternal>> {
        if let Some(cache) = self.existing(class) {
            return Some(cache);
        }

        let mut caches = self.caches.write();
        if let Some(cache) = caches.get(class) {
            return Some(Arc::clone(cache));
        }
        let scope = format!("{}:{}", IMPL_PER_CLASS, class);
        match create_cache(&self.ctx, &self.class_descriptor, Some(&scope)) {
            Ok(cache) => {
                caches.insert(class.clone(), Arc::clone(&cache));
                Some(cache)
            }
            Err(e) => {
                log::error!("Cannot create class cache for {}: {}", class, e);
                None
            }
        }
    }

    pub fn class_count(&self) -> usize {
        self.caches.read().len()
    }
}

impl ObjectCache for PerClassCache {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        if let Some(cache) = self.cache_for(identity.real_class()) {
            cache.cache(identity, object);
        }
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        self.cache_for(identity.real_class())
            .map_or(false, |cache| cache.cache_if_new(identity, object))
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        // Lookups never create a sub-cache
        self.existing(identity.real_class())
            .and_then(|cache| cache.lookup(identity))
    }

    fn remove(&self, identity: &Identity) {
        if let Some(cache) = self.existing(identity.real_class()) {
            cache.remove(identity);
        }
    }

    fn clear(&self) {
        let caches: Vec<_> = self.caches.read().values().cloned().collect();
        for cache in caches {
            cache.clear();
        }
    }
}

impl ObjectCacheInternal for PerClassCache {
    fn do_internal_cache(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType) {
        if let Some(cache) = self.cache_for(identity.real_class()) {
            cache.do_internal_cache(identity, object, entry_type);
        }
    }

    fn name(&self) -> &'static str {
        IMPL_PER_CLASS
    }
}
