// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Broker creation, thread binding and process-wide installation
//!
//! A [`BrokerFactory`] owns everything brokers share: the mapping
//! repository, the store, the [`CacheRegistry`] holding shared tier tables
//! and the proxy factory. Brokers can be bound to the current thread so
//! proxies materialize through the caller's broker. A factory can also be
//! installed process-wide, which lets deserialized proxies (which carry no
//! factory handle) find a broker source.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::persistence_broker::PersistenceBroker;
use crate::cache::CacheRegistry;
use crate::config::BrokerConfig;
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::PBKey;
use crate::metadata::DescriptorRepository;
use crate::proxy::ProxyFactory;
use crate::store::ObjectStore;

/// Factory installed for the whole process
static INSTALLED_FACTORY: Lazy<RwLock<Option<Arc<BrokerFactory>>>> =
    Lazy::new(|| RwLock::new(None));

struct Bound {
    factory_id: Uuid,
    broker: Arc<PersistenceBroker>,
}

thread_local! {
    /// Brokers bound to this thread, innermost binding last
    static BOUND_BROKERS: RefCell<Vec<Bound>> = RefCell::new(Vec::new());
}

pub struct BrokerFactory {
    id: Uuid,
    repository: Arc<DescriptorRepository>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<CacheRegistry>,
    proxy_factory: Arc<ProxyFactory>,
    config: BrokerConfig,
    self_ref: Weak<BrokerFactory>,
}

impl BrokerFactory {
    pub fn new(
        repository: Arc<DescriptorRepository>,
        store: Arc<dyn ObjectStore>,
        config: BrokerConfig,
    ) -> PersistenceResult<Arc<Self>> {
        Self::with_registry(repository, store, config, CacheRegistry::new())
    }

    /// Factory sharing an existing registry, e.g. with a second factory over
    /// the same store
    pub fn with_registry(
        repository: Arc<DescriptorRepository>,
        store: Arc<dyn ObjectStore>,
        config: BrokerConfig,
        registry: Arc<CacheRegistry>,
    ) -> PersistenceResult<Arc<Self>> {
        config.validate()?;
        let proxy_factory = ProxyFactory::new(&config.proxy)?;
        proxy_factory.validate(&repository)?;

        let factory = Arc::new_cyclic(|weak| BrokerFactory {
            id: Uuid::new_v4(),
            repository,
            store,
            registry,
            proxy_factory: Arc::new(proxy_factory),
            config,
            self_ref: weak.clone(),
        });
        log::info!(
            "Broker factory {} ready ({:?} proxies)",
            factory.id,
            factory.proxy_factory.reference_kind()
        );
        Ok(factory)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn repository(&self) -> &Arc<DescriptorRepository> {
        &self.repository
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn proxy_factory(&self) -> &Arc<ProxyFactory> {
        &self.proxy_factory
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub(crate) fn downgrade(&self) -> Weak<BrokerFactory> {
        self.self_ref.clone()
    }

    /// New broker for `pb_key`; the connection alias must be mapped
    pub fn create_broker(&self, pb_key: PBKey) -> PersistenceResult<Arc<PersistenceBroker>> {
        self.open(pb_key, false)
    }

    /// Broker whose transaction is driven by an external coordinator
    pub fn create_managed_broker(&self, pb_key: PBKey) -> PersistenceResult<Arc<PersistenceBroker>> {
        self.open(pb_key, true)
    }

    fn open(&self, pb_key: PBKey, managed: bool) -> PersistenceResult<Arc<PersistenceBroker>> {
        if self.repository.connection(&pb_key.jcd_alias).is_none() {
            return Err(PersistenceError::Configuration(format!(
                "Unknown connection alias '{}'",
                pb_key.jcd_alias
            )));
        }
        PersistenceBroker::open(self, pb_key, managed)
    }

    /// Bind `broker` to the current thread until the returned guard drops
    pub fn bind(&self, broker: &Arc<PersistenceBroker>) -> ThreadBinding {
        BOUND_BROKERS.with(|bound| {
            bound.borrow_mut().push(Bound {
                factory_id: self.id,
                broker: Arc::clone(broker),
            })
        });
        ThreadBinding {
            broker_id: broker.id(),
            _not_send: PhantomData,
        }
    }

    /// Innermost open broker bound to this thread for `pb_key`
    pub fn current_broker(&self, pb_key: &PBKey) -> Option<Arc<PersistenceBroker>> {
        BOUND_BROKERS.with(|bound| {
            bound
                .borrow()
                .iter()
                .rev()
                .find(|b| b.factory_id == self.id && b.broker.pb_key() == pb_key && !b.broker.is_closed())
                .map(|b| Arc::clone(&b.broker))
        })
    }

    /// Make this factory the process-wide broker source, replacing any other
    pub fn install(&self) -> PersistenceResult<()> {
        let this = self.self_ref.upgrade().ok_or_else(|| {
            PersistenceError::Configuration("Broker factory is being dropped".to_string())
        })?;
        let previous = INSTALLED_FACTORY.write().replace(this);
        if let Some(previous) = previous {
            if previous.id != self.id {
                log::warn!("Replacing installed broker factory {}", previous.id);
            }
        }
        log::info!("Installed broker factory {}", self.id);
        Ok(())
    }

    pub fn installed() -> Option<Arc<BrokerFactory>> {
        INSTALLED_FACTORY.read().clone()
    }

    pub fn uninstall() -> Option<Arc<BrokerFactory>> {
        INSTALLED_FACTORY.write().take()
    }

    pub fn is_installed(&self) -> bool {
        INSTALLED_FACTORY
            .read()
            .as_ref()
            .map_or(false, |installed| installed.id == self.id)
    }

    /// Drop all shared cache state and uninstall this factory if installed
    pub fn shutdown(&self) {
        if self.is_installed() {
            Self::uninstall();
        }
        self.registry.shutdown();
    }
}

impl fmt::Debug for BrokerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerFactory")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("proxy_kind", &self.proxy_factory.reference_kind())
            .finish()
    }
}

/// Guard keeping a broker bound to the creating thread
pub struct ThreadBinding {
    broker_id: Uuid,
    // Bindings live in a thread local and must be released on the same thread
    _not_send: PhantomData<*const ()>,
}

impl Drop for ThreadBinding {
    fn drop(&mut self) {
        BOUND_BROKERS.with(|bound| {
            let mut bound = bound.borrow_mut();
            if let Some(pos) = bound.iter().rposition(|b| b.broker.id() == self.broker_id) {
                bound.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheDescriptor;
    use crate::metadata::{ClassDescriptor, ConnectionDescriptor};
    use crate::store::InMemoryStore;

    fn factory() -> Arc<BrokerFactory> {
        let mut repo = DescriptorRepository::new();
        repo.add_connection(ConnectionDescriptor::new("main").with_cache(CacheDescriptor::new("default")));
        repo.add_class(ClassDescriptor::new("shop.Article").with_pk("id"));
        let repo = Arc::new(repo);
        let store = Arc::new(InMemoryStore::new(Arc::clone(&repo)));
        BrokerFactory::new(repo, store, BrokerConfig::default()).unwrap()
    }

    #[test]
    fn test_unknown_alias_is_configuration_error() {
        let err = factory().create_broker(PBKey::new("reporting")).unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));
    }

    #[test]
    fn test_unresolvable_cache_fails_eagerly() {
        let mut repo = DescriptorRepository::new();
        repo.add_connection(ConnectionDescriptor::new("main"));
        repo.add_class(ClassDescriptor::new("shop.Article").with_pk("id"));
        let repo = Arc::new(repo);
        let store = Arc::new(InMemoryStore::new(Arc::clone(&repo)));
        let factory = BrokerFactory::new(repo, store, BrokerConfig::default()).unwrap();

        let err = factory.create_broker(PBKey::new("main")).unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));
    }

    #[test]
    fn test_binding_is_scoped_and_nested() {
        let factory = factory();
        let key = PBKey::new("main");
        assert!(factory.current_broker(&key).is_none());

        let outer = factory.create_broker(key.clone()).unwrap();
        let _outer_binding = factory.bind(&outer);
        {
            let inner = factory.create_broker(key.clone()).unwrap();
            let _inner_binding = factory.bind(&inner);
            assert_eq!(factory.current_broker(&key).unwrap().id(), inner.id());
        }
        assert_eq!(factory.current_broker(&key).unwrap().id(), outer.id());

        outer.close().unwrap();
        assert!(factory.current_broker(&key).is_none());
    }

    #[test]
    fn test_binding_is_per_factory() {
        let first = factory();
        let second = factory();
        let key = PBKey::new("main");
        let broker = first.create_broker(key.clone()).unwrap();
        let _binding = first.bind(&broker);
        assert!(first.current_broker(&key).is_some());
        assert!(second.current_broker(&key).is_none());
    }
}
