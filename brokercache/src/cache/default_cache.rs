// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Expiring soft-reference tier shared by all brokers

use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::autosync::AutoSyncTracer;
use super::cache_config::{TierConfig, IMPL_DEFAULT};
use super::factory::TierContext;
use super::key::CacheKey;
use super::table::{EntryOptions, ObjectTable};
use super::{ObjectCache, ObjectCacheInternal};
use crate::broker::PersistenceBroker;
use crate::error::PersistenceResult;
use crate::identity::Identity;
use crate::object::ObjectRef;

/// Default tier: one shared table per registry (or per scope), entries
/// expire `timeout_secs` after insertion and are held softly unless
/// configured otherwise
pub struct DefaultCache {
    table: Arc<ObjectTable<CacheKey>>,
    config: TierConfig,
    jcd_alias: String,
    repository_id: Uuid,
    broker: Weak<PersistenceBroker>,
    tracer: Option<Arc<AutoSyncTracer>>,
}

impl DefaultCache {
    pub fn new(ctx: &TierContext, config: &TierConfig, table_name: &str) -> PersistenceResult<Self> {
        let table = ctx
            .registry
            .shared(table_name, ObjectTable::<CacheKey>::new)?;
        let tracer = config
            .auto_sync
            .then(|| AutoSyncTracer::new(Arc::clone(&table)));
        log::debug!(
            "Created default cache on table '{}' (timeout {}s, soft {}, auto-sync {})",
            table_name,
            config.timeout_secs,
            config.use_soft_references,
            config.auto_sync
        );
        Ok(Self {
            table,
            config: config.clone(),
            jcd_alias: ctx.pb_key.jcd_alias.clone(),
            repository_id: ctx.repository.id(),
            broker: ctx.broker.clone(),
            tracer,
        })
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Entries currently in the shared table, across all brokers
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Keys traced for rollback eviction in the running transaction
    pub fn traced_len(&self) -> usize {
        self.tracer.as_ref().map_or(0, |t| t.traced_len())
    }

    fn key(&self, identity: &Identity) -> CacheKey {
        CacheKey::new(
            identity,
            self.config.caching_key_type,
            &self.jcd_alias,
            self.repository_id,
        )
    }

    fn options(&self) -> EntryOptions {
        EntryOptions::new(self.config.use_soft_references, self.config.timeout())
    }

    fn trace(&self, key: &CacheKey) {
        if let Some(tracer) = &self.tracer {
            if let Some(broker) = self.broker.upgrade() {
                tracer.trace(key, &broker);
            }
        }
    }
}

impl ObjectCache for DefaultCache {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        let key = self.key(identity);
        self.table.put(key.clone(), object, self.options());
        self.trace(&key);
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        let key = self.key(identity);
        let stored = self.table.put_if_absent(key.clone(), object, self.options());
        if stored {
            self.trace(&key);
        }
        stored
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        let key = self.key(identity);
        let found = self.table.get(&key);
        if found.is_some() {
            self.trace(&key);
        }
        found
    }

    fn remove(&self, identity: &Identity) {
        self.table.remove(&self.key(identity));
    }

    fn clear(&self) {
        self.table.clear();
    }
}

impl ObjectCacheInternal for DefaultCache {
    fn name(&self) -> &'static str {
        IMPL_DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_config::CachingKeyType;
    use crate::cache::registry::CacheRegistry;
    use crate::identity::PBKey;
    use crate::metadata::DescriptorRepository;
    use crate::object::PersistentObject;
    use crate::value::Value;
    use std::thread;
    use std::time::Duration;

    fn context(alias: &str, registry: &Arc<CacheRegistry>, repository: &Arc<DescriptorRepository>) -> TierContext {
        TierContext::detached(PBKey::new(alias), Arc::clone(repository), Arc::clone(registry))
    }

    fn id(pk: i64) -> Identity {
        Identity::new("shop.Article", "shop.Article", vec![Value::Int(pk)])
    }

    fn article(pk: i64) -> ObjectRef {
        ObjectRef::new(PersistentObject::new("shop.Article").with_field("id", pk))
    }

    #[test]
    fn test_lookup_returns_same_instance() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let cache = DefaultCache::new(&context("main", &registry, &repo), &TierConfig::default(), "default").unwrap();

        let obj = article(1);
        cache.cache(&id(1), &obj);
        assert!(cache.lookup(&id(1)).unwrap().ptr_eq(&obj));
        assert!(cache.lookup(&id(2)).is_none());
    }

    #[test]
    fn test_cache_if_new_keeps_first_instance() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let cache = DefaultCache::new(&context("main", &registry, &repo), &TierConfig::default(), "default").unwrap();

        let first = article(1);
        let second = article(1);
        assert!(cache.cache_if_new(&id(1), &first));
        assert!(!cache.cache_if_new(&id(1), &second));
        assert!(cache.lookup(&id(1)).unwrap().ptr_eq(&first));
    }

    #[test]
    fn test_entries_expire_after_timeout() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let config = TierConfig {
            timeout_secs: 0,
            ..TierConfig::default()
        };
        let cache = DefaultCache::new(&context("main", &registry, &repo), &config, "default").unwrap();

        let obj = article(1);
        cache.cache(&id(1), &obj);
        thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup(&id(1)).is_none());
        assert!(cache.is_empty());
        cache.remove(&id(1));
    }

    #[test]
    fn test_negative_timeout_never_expires() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let config = TierConfig {
            timeout_secs: -1,
            ..TierConfig::default()
        };
        let cache = DefaultCache::new(&context("main", &registry, &repo), &config, "default").unwrap();
        let obj = article(1);
        cache.cache(&id(1), &obj);
        thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup(&id(1)).is_some());
    }

    #[test]
    fn test_soft_entries_reclaimed_under_memory_pressure() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let cache = DefaultCache::new(&context("main", &registry, &repo), &TierConfig::default(), "default").unwrap();

        cache.cache(&id(1), &article(1));
        let held = article(2);
        cache.cache(&id(2), &held);

        assert_eq!(registry.memory_pressure(), 1);
        assert!(cache.lookup(&id(1)).is_none());
        assert!(cache.lookup(&id(2)).unwrap().ptr_eq(&held));
    }

    #[test]
    fn test_hard_entries_survive_memory_pressure() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let config = TierConfig {
            use_soft_references: false,
            ..TierConfig::default()
        };
        let cache = DefaultCache::new(&context("main", &registry, &repo), &config, "default").unwrap();
        cache.cache(&id(1), &article(1));
        assert_eq!(registry.memory_pressure(), 0);
        assert!(cache.lookup(&id(1)).is_some());
    }

    #[test]
    fn test_table_shared_between_tier_instances() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let first = DefaultCache::new(&context("main", &registry, &repo), &TierConfig::default(), "default").unwrap();
        let second = DefaultCache::new(&context("main", &registry, &repo), &TierConfig::default(), "default").unwrap();

        let obj = article(1);
        first.cache(&id(1), &obj);
        assert!(second.lookup(&id(1)).unwrap().ptr_eq(&obj));
    }

    #[test]
    fn test_alias_key_type_separates_connections() {
        let registry = CacheRegistry::new();
        let repo = Arc::new(DescriptorRepository::new());
        let config = TierConfig {
            caching_key_type: CachingKeyType::IdentityAndAlias,
            ..TierConfig::default()
        };
        let main = DefaultCache::new(&context("main", &registry, &repo), &config, "default").unwrap();
        let archive = DefaultCache::new(&context("archive", &registry, &repo), &config, "default").unwrap();

        let obj = article(1);
        main.cache(&id(1), &obj);
        assert!(archive.lookup(&id(1)).is_none());
        assert!(main.lookup(&id(1)).is_some());
    }
}
