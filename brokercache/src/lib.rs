// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! brokercache - object cache and lazy materialization for a persistence broker
//!
//! The crate keeps materialized objects unique per identity and defers
//! loading of related objects until they are touched.
//!
//! # Features
//!
//! - **Pluggable cache tiers**: expiring soft-reference, per-broker,
//!   per-class, soft LRU, two-level (session + application) and empty
//! - **Cache distribution**: per class, per connection or per distinct
//!   descriptor, with package exclusions
//! - **Materialization buffering**: half-built object graphs never reach a
//!   shared tier
//! - **Proxies**: interface-based and subclass-based reference proxies and
//!   collection proxies that can count without loading
//!
//! # Usage
//!
//! ```rust,ignore
//! use brokercache::{BrokerConfig, BrokerFactory, InMemoryStore, PBKey};
//!
//! let factory = BrokerFactory::new(repository, store, BrokerConfig::default())?;
//! let broker = factory.create_broker(PBKey::new("main"))?;
//! let _binding = factory.bind(&broker);
//!
//! let id = broker.identity("shop.Article", vec![42.into()])?;
//! let article = broker.get_object_by_identity(&id)?;
//! ```

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod object;
pub mod proxy;
pub mod store;
pub mod value;

pub use broker::{
    BrokerEvent, BrokerFactory, BrokerLease, BrokerListener, PersistenceBroker, ThreadBinding,
};
pub use cache::{
    CacheDescriptor, CacheEntryType, CacheRegistry, CacheSettings, CachingKeyType, ObjectCache,
    ObjectCacheInternal, TierConfig,
};
pub use config::{BrokerConfig, ProxySettings};
pub use error::{PersistenceError, PersistenceResult};
pub use identity::{ClassName, Identity, PBKey};
pub use metadata::{
    ClassDescriptor, CollectionDescriptor, ConnectionDescriptor, DescriptorRepository,
    ReferenceDescriptor,
};
pub use object::{CollectionKind, CollectionSlot, ManagedCollection, ObjectRef, PersistentObject, ReferenceSlot};
pub use proxy::{
    CollectionLoadListener, CollectionProxy, IndirectionHandler, IndirectionProxy,
    MaterializationListener, ProxyKind,
};
pub use store::{InMemoryStore, ObjectStore, Query, Row};
pub use value::Value;

/// brokercache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
