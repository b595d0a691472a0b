// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Object cache tiers
//!
//! This module decides whether a requested object is already in memory:
//! - Pluggable tiers sharing the [`ObjectCache`] contract (expiring soft
//!   reference, per-broker, per-class, soft LRU, two-level, empty)
//! - The [`CacheDistributor`] routing each class to its tier instance
//! - The [`MaterializationCache`] shielding tiers from half-built graphs
//!
//! Shared tier state lives in an explicitly created [`CacheRegistry`]
//! rather than in process-wide statics.

pub mod autosync;
pub mod cache_config;
pub mod copy_strategy;
pub mod default_cache;
pub mod distributor;
pub mod empty_cache;
pub mod factory;
pub mod key;
pub mod materialization;
pub mod per_broker;
pub mod per_class;
pub mod reference;
pub mod registry;
pub mod soft_lru;
pub mod table;
pub mod two_level;

pub use cache_config::{CacheDescriptor, CacheSettings, CachingKeyType, TierConfig};
pub use copy_strategy::{CopyStrategy, FieldCopyStrategy};
pub use default_cache::DefaultCache;
pub use distributor::CacheDistributor;
pub use empty_cache::EmptyCache;
pub use factory::{create_cache, TierContext};
pub use key::CacheKey;
pub use materialization::{MaterializationCache, MaterializationScope};
pub use per_broker::PerBrokerCache;
pub use per_class::PerClassCache;
pub use reference::{ReclaimQueue, SoftReference};
pub use registry::{CacheRegistry, SharedTable};
pub use soft_lru::SoftLruCache;
pub use table::{EntryOptions, ObjectTable};
pub use two_level::TwoLevelCache;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::object::ObjectRef;

/// Why an object is being cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CacheEntryType {
    /// Stored or changed inside the current transaction
    Write,
    /// Read from a cache or already known to the application tier
    CachedRead,
    /// Freshly loaded from the store
    NewMaterialized,
    #[default]
    Unknown,
    /// Working copy that must never reach a higher-level cache
    Temp,
}

impl CacheEntryType {
    pub fn is_promotable(&self) -> bool {
        !matches!(self, CacheEntryType::Temp)
    }
}

/// Contract shared by every cache tier
///
/// None of these calls fail on ordinary misses: an expired, reclaimed or
/// never-cached entry is simply "not found".
pub trait ObjectCache: Send + Sync {
    /// Store or overwrite the entry for `identity`
    fn cache(&self, identity: &Identity, object: &ObjectRef);

    /// Store only if no live entry exists; returns whether it stored
    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool;

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef>;

    fn remove(&self, identity: &Identity);

    fn clear(&self);
}

/// Tier-side extension used by the broker and the materialization cache
pub trait ObjectCacheInternal: ObjectCache {
    /// Cache with the reason attached; tiers without type handling ignore it
    fn do_internal_cache(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType) {
        let _ = entry_type;
        self.cache(identity, object);
    }

    /// Short implementation name, used in logs
    fn name(&self) -> &'static str;
}
