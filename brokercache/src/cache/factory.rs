// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Tier instantiation by implementation name

use std::sync::{Arc, Weak};

use super::cache_config::{
    CacheDescriptor, IMPL_DEFAULT, IMPL_EMPTY, IMPL_PER_BROKER, IMPL_PER_CLASS, IMPL_SOFT_LRU,
    IMPL_TWO_LEVEL,
};
use super::default_cache::DefaultCache;
use super::empty_cache::EmptyCache;
use super::per_broker::PerBrokerCache;
use super::per_class::PerClassCache;
use super::registry::CacheRegistry;
use super::soft_lru::SoftLruCache;
use super::two_level::TwoLevelCache;
use super::ObjectCacheInternal;
use crate::broker::PersistenceBroker;
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::PBKey;
use crate::metadata::DescriptorRepository;

/// Everything a tier needs from its surroundings at construction time
#[derive(Clone)]
pub struct TierContext {
    pub broker: Weak<PersistenceBroker>,
    pub pb_key: PBKey,
    pub repository: Arc<DescriptorRepository>,
    pub registry: Arc<CacheRegistry>,
}

impl TierContext {
    pub fn new(
        broker: Weak<PersistenceBroker>,
        pb_key: PBKey,
        repository: Arc<DescriptorRepository>,
        registry: Arc<CacheRegistry>,
    ) -> Self {
        Self {
            broker,
            pb_key,
            repository,
            registry,
        }
    }

    /// Context without an owning broker; broker events never reach its tiers
    pub fn detached(
        pb_key: PBKey,
        repository: Arc<DescriptorRepository>,
        registry: Arc<CacheRegistry>,
    ) -> Self {
        Self::new(Weak::new(), pb_key, repository, registry)
    }

    pub fn broker(&self) -> Option<Arc<PersistenceBroker>> {
        self.broker.upgrade()
    }
}

/// Instantiate the tier named by `descriptor`
///
/// `scope` separates the shared tables of nested tiers (per-class
/// sub-caches, two-level application caches) from top-level ones.
pub fn create_cache(
    ctx: &TierContext,
    descriptor: &CacheDescriptor,
    scope: Option<&str>,
) -> PersistenceResult<Arc<dyn ObjectCacheInternal>> {
    descriptor.validate()?;
    let table_name = match scope {
        Some(scope) => format!("{}:{}", descriptor.implementation, scope),
        None => descriptor.implementation.clone(),
    };
    let config = &descriptor.config;

    let cache: Arc<dyn ObjectCacheInternal> = match descriptor.implementation.as_str() {
        IMPL_DEFAULT => Arc::new(DefaultCache::new(ctx, config, &table_name)?),
        IMPL_EMPTY => Arc::new(EmptyCache),
        IMPL_PER_BROKER => Arc::new(PerBrokerCache::new(ctx, config)),
        IMPL_PER_CLASS => Arc::new(PerClassCache::new(ctx, config)),
        IMPL_SOFT_LRU => Arc::new(SoftLruCache::new(ctx, config, &table_name)?),
        IMPL_TWO_LEVEL => TwoLevelCache::create(ctx, config)?,
        other => {
            return Err(PersistenceError::CacheInstantiation {
                implementation: other.to_string(),
                reason: "no such tier".to_string(),
            })
        }
    };
    log::debug!("Instantiated '{}' cache for {}", cache.name(), ctx.pb_key);
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TierContext {
        TierContext::detached(
            PBKey::new("main"),
            Arc::new(DescriptorRepository::new()),
            CacheRegistry::new(),
        )
    }

    #[test]
    fn test_creates_every_known_tier() {
        let ctx = context();
        for name in super::super::cache_config::KNOWN_IMPLEMENTATIONS {
            let cache = create_cache(&ctx, &CacheDescriptor::new(*name), None).unwrap();
            assert_eq!(cache.name(), *name);
        }
    }

    #[test]
    fn test_unknown_tier_fails() {
        let err = create_cache(&context(), &CacheDescriptor::new("bogus"), None)
            .err()
            .unwrap();
        assert!(matches!(err, PersistenceError::CacheInstantiation { .. }));
    }

    #[test]
    fn test_scope_separates_tables() {
        let ctx = context();
        create_cache(&ctx, &CacheDescriptor::new(IMPL_DEFAULT), None).unwrap();
        create_cache(&ctx, &CacheDescriptor::new(IMPL_DEFAULT), Some("per-class:shop.Article")).unwrap();
        assert_eq!(
            ctx.registry.table_names(),
            vec![
                "default".to_string(),
                "default:per-class:shop.Article".to_string()
            ]
        );
    }
}
