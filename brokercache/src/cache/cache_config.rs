// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache tier configuration
//!
//! A [`CacheDescriptor`] names the tier implementation and carries the
//! [`TierConfig`] values the tier reads once at construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PersistenceError, PersistenceResult};

pub const IMPL_DEFAULT: &str = "default";
pub const IMPL_EMPTY: &str = "empty";
pub const IMPL_PER_BROKER: &str = "per-broker";
pub const IMPL_PER_CLASS: &str = "per-class";
pub const IMPL_SOFT_LRU: &str = "soft-lru";
pub const IMPL_TWO_LEVEL: &str = "two-level";

pub const KNOWN_IMPLEMENTATIONS: &[&str] = &[
    IMPL_DEFAULT,
    IMPL_EMPTY,
    IMPL_PER_BROKER,
    IMPL_PER_CLASS,
    IMPL_SOFT_LRU,
    IMPL_TWO_LEVEL,
];

pub const COPY_STRATEGY_FIELD_COPY: &str = "field-copy";

/// What besides the identity goes into a tier's cache key
///
/// The same identity can be valid against different connections or
/// repositories at once, so those must not collide in a shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum CachingKeyType {
    /// Identity alone
    #[default]
    Identity,
    /// Identity + connection alias
    IdentityAndAlias,
    /// Identity + repository instance
    IdentityAndRepository,
    /// Identity + connection alias + repository instance
    IdentityAliasAndRepository,
}

impl TryFrom<u8> for CachingKeyType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CachingKeyType::Identity),
            1 => Ok(CachingKeyType::IdentityAndAlias),
            2 => Ok(CachingKeyType::IdentityAndRepository),
            3 => Ok(CachingKeyType::IdentityAliasAndRepository),
            other => Err(format!("Caching key type must be 0..=3, got {}", other)),
        }
    }
}

impl From<CachingKeyType> for u8 {
    fn from(value: CachingKeyType) -> Self {
        match value {
            CachingKeyType::Identity => 0,
            CachingKeyType::IdentityAndAlias => 1,
            CachingKeyType::IdentityAndRepository => 2,
            CachingKeyType::IdentityAliasAndRepository => 3,
        }
    }
}

impl CachingKeyType {
    pub fn includes_alias(&self) -> bool {
        matches!(
            self,
            CachingKeyType::IdentityAndAlias | CachingKeyType::IdentityAliasAndRepository
        )
    }

    pub fn includes_repository(&self) -> bool {
        matches!(
            self,
            CachingKeyType::IdentityAndRepository | CachingKeyType::IdentityAliasAndRepository
        )
    }
}

/// Values a tier reads once when it is constructed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Entry lifetime in seconds; negative means entries never expire
    pub timeout_secs: i64,

    /// Hold cached objects through reclaimable references
    pub use_soft_references: bool,

    pub caching_key_type: CachingKeyType,

    /// Evict entries touched during a transaction when it rolls back
    pub auto_sync: bool,

    /// Size of the hard-reference queue of the soft LRU tier
    pub max_entries: usize,

    /// Tier implementation backing the two-level application cache
    pub application_cache: String,

    /// Copy strategy of the two-level cache
    pub copy_strategy: String,

    /// Re-materialize every reference of an application-cache hit as a proxy
    pub force_proxies: bool,

    /// Tier implementation used for each class by the per-class tier
    pub class_cache: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            use_soft_references: true,
            caching_key_type: CachingKeyType::Identity,
            auto_sync: false,
            max_entries: 1000,
            application_cache: IMPL_DEFAULT.to_string(),
            copy_strategy: COPY_STRATEGY_FIELD_COPY.to_string(),
            force_proxies: false,
            class_cache: IMPL_DEFAULT.to_string(),
        }
    }
}

impl TierConfig {
    /// `None` for tiers whose entries never expire
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs < 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs as u64))
        }
    }

    /// Implementation a tier of kind `implementation` builds inside itself
    fn nested_implementation(&self, implementation: &str) -> Option<&str> {
        match implementation {
            IMPL_TWO_LEVEL => Some(self.application_cache.as_str()),
            IMPL_PER_CLASS => Some(self.class_cache.as_str()),
            _ => None,
        }
    }
}

/// Tier implementation name plus its configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheDescriptor {
    pub implementation: String,
    #[serde(default)]
    pub config: TierConfig,
}

impl CacheDescriptor {
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            config: TierConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TierConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks every implementation name this descriptor will instantiate
    pub fn validate(&self) -> PersistenceResult<()> {
        check_implementation(&self.implementation)?;
        self.check_nesting()?;
        match self.implementation.as_str() {
            IMPL_TWO_LEVEL => {
                if self.config.copy_strategy != COPY_STRATEGY_FIELD_COPY {
                    return Err(PersistenceError::Configuration(format!(
                        "Unknown copy strategy: {}",
                        self.config.copy_strategy
                    )));
                }
            }
            IMPL_SOFT_LRU if self.config.max_entries == 0 => {
                return Err(PersistenceError::Configuration(
                    "Soft LRU cache needs max_entries > 0".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Nested tiers share this descriptor's config, so the chain of
    /// implementations they build must end before it repeats
    fn check_nesting(&self) -> PersistenceResult<()> {
        let mut chain = vec![self.implementation.as_str()];
        let mut current = self.implementation.as_str();
        while let Some(inner) = self.config.nested_implementation(current) {
            check_implementation(inner)?;
            let repeats = chain.contains(&inner);
            chain.push(inner);
            if repeats {
                return Err(PersistenceError::Configuration(format!(
                    "Cache tiers nest forever: {}",
                    chain.join(" -> ")
                )));
            }
            current = inner;
        }
        Ok(())
    }
}

fn check_implementation(name: &str) -> PersistenceResult<()> {
    if KNOWN_IMPLEMENTATIONS.contains(&name) {
        Ok(())
    } else {
        Err(PersistenceError::CacheInstantiation {
            implementation: name.to_string(),
            reason: format!(
                "unknown implementation, expected one of: {}",
                KNOWN_IMPLEMENTATIONS.join(", ")
            ),
        })
    }
}

/// Distributor-wide cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Package prefixes whose classes are never cached
    pub exclude_packages: Vec<String>,

    /// Share one tier instance per distinct cache descriptor instead of
    /// one per class / connection
    pub descriptor_based_caches: bool,
}
