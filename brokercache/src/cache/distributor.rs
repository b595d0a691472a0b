// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Routing of classes to tier instances
//!
//! Each broker owns one distributor. For a class the distributor uses the
//! class descriptor's cache configuration, else the connection's, and
//! instantiates the tier on first use. Classes under an excluded package
//! prefix get the [`EmptyCache`]. With `descriptor_based_caches` all classes
//! sharing an identical cache descriptor share one tier instance.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::cache_config::{CacheDescriptor, CacheSettings};
use super::empty_cache::EmptyCache;
use super::factory::{create_cache, TierContext};
use super::{CacheEntryType, ObjectCache, ObjectCacheInternal};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{ClassName, Identity};
use crate::object::ObjectRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ResolutionKey {
    Class(ClassName),
    Descriptor(CacheDescriptor),
    Connection(String),
}

enum Resolution {
    Excluded,
    Tier(ResolutionKey, CacheDescriptor),
}

pub struct CacheDistributor {
    ctx: TierContext,
    settings: CacheSettings,
    caches: RwLock<HashMap<ResolutionKey, Arc<dyn ObjectCacheInternal>>>,
    empty: Arc<EmptyCache>,
}

impl CacheDistributor {
    pub fn new(ctx: TierContext, settings: CacheSettings) -> Self {
        Self {
            ctx,
            settings,
            caches: RwLock::new(HashMap::new()),
            empty: Arc::new(EmptyCache),
        }
    }

    /// Check that every mapped class resolves to a valid tier configuration
    pub fn validate(&self) -> PersistenceResult<()> {
        for cld in self.ctx.repository.classes() {
            if let Resolution::Tier(_, descriptor) = self.resolve(&cld.class)? {
                descriptor.validate()?;
            }
        }
        Ok(())
    }

    pub fn is_excluded(&self, class: &ClassName) -> bool {
        let name = class.as_str();
        self.settings.exclude_packages.iter().any(|prefix| {
            name.strip_prefix(prefix.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('.'))
        })
    }

    fn resolve(&self, class: &ClassName) -> PersistenceResult<Resolution> {
        if self.is_excluded(class) {
            return Ok(Resolution::Excluded);
        }

        let descriptor_based = self.settings.descriptor_based_caches;
        let keyed = |fallback: ResolutionKey, descriptor: CacheDescriptor| {
            let key = if descriptor_based {
                ResolutionKey::Descriptor(descriptor.clone())
            } else {
                fallback
            };
            Resolution::Tier(key, descriptor)
        };

        let class_cache = self
            .ctx
            .repository
            .class_descriptor(class)
            .ok()
            .and_then(|cld| cld.cache.clone());
        if let Some(descriptor) = class_cache {
            return Ok(keyed(ResolutionKey::Class(class.clone()), descriptor));
        }

        let alias = &self.ctx.pb_key.jcd_alias;
        match self.ctx.repository.connection(alias).and_then(|jcd| jcd.cache.clone()) {
            Some(descriptor) => Ok(keyed(ResolutionKey::Connection(alias.clone()), descriptor)),
            None => Err(PersistenceError::Configuration(format!(
                "No cache configured for class {} or connection '{}'",
                class, alias
            ))),
        }
    }

    /// Tier instance responsible for `class`, created on first use
    pub fn cache_for(&self, class: &ClassName) -> PersistenceResult<Arc<dyn ObjectCacheInternal>> {
        let (key, descriptor) = match self.resolve(class)? {
            Resolution::Excluded => return Ok(self.empty.clone() as Arc<dyn ObjectCacheInternal>),
            Resolution::Tier(key, descriptor) => (key, descriptor),
        };

        if let Some(cache) = self.caches.read().get(&key) {
            return Ok(Arc::clone(cache));
        }

        let mut caches = self.caches.write();
        // Another thread may have created it while we waited
        if let Some(cache) = caches.get(&key) {
            return Ok(Arc::clone(cache));
        }
        let cache = create_cache(&self.ctx, &descriptor, None)?;
        log::debug!("Cache distributor bound {:?} to '{}'", key, cache.name());
        caches.insert(key, Arc::clone(&cache));
        Ok(cache)
    }

    /// Number of tier instances created so far
    pub fn tier_count(&self) -> usize {
        self.caches.read().len()
    }

    fn with_cache<R>(&self, identity: &Identity, default: R, f: impl FnOnce(&dyn ObjectCacheInternal) -> R) -> R {
        match self.cache_for(identity.real_class()) {
            Ok(cache) => f(cache.as_ref()),
            Err(e) => {
                log::error!("Bypassing cache for {}: {}", identity, e);
                default
            }
        }
    }
}

impl ObjectCache for CacheDistributor {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        self.with_cache(identity, (), |cache| cache.cache(identity, object));
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        self.with_cache(identity, false, |cache| cache.cache_if_new(identity, object))
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        self.with_cache(identity, None, |cache| cache.lookup(identity))
    }

    fn remove(&self, identity: &Identity) {
        self.with_cache(identity, (), |cache| cache.remove(identity));
    }

    fn clear(&self) {
        let caches: Vec<_> = self.caches.read().values().cloned().collect();
        for cache in caches {
            cache.clear();
        }
    }
}

impl ObjectCacheInternal for CacheDistributor {
    fn do_internal_cache(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType) {
        self.with_cache(identity, (), |cache| {
            cache.do_internal_cache(identity, object, entry_type)
        });
    }

    fn name(&self) -> &'static str {
        "distributor"
    }
}
