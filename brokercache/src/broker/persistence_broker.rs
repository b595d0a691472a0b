// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The persistence broker
//!
//! A broker materializes rows into objects, consulting its cache first and
//! resolving references and collections either eagerly or through proxies.
//! Every materialization runs inside a [`MaterializationScope`], so
//! half-built graphs stay in the broker-local buffer until the outermost
//! call completes.
//!
//! [`MaterializationScope`]: crate::cache::MaterializationScope

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::event::{BrokerEvent, BrokerListener};
use super::factory::BrokerFactory;
use crate::cache::{
    CacheDistributor, CacheEntryType, MaterializationCache, ObjectCache, ObjectCacheInternal,
    TierContext,
};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{ClassName, Identity, PBKey};
use crate::metadata::{ClassDescriptor, CollectionDescriptor, DescriptorRepository, ReferenceDescriptor};
use crate::object::{CollectionSlot, ManagedCollection, ObjectRef, PersistentObject, ReferenceSlot};
use crate::proxy::{CollectionProxy, IndirectionProxy, ProxyFactory};
use crate::store::{ObjectStore, Query, Row};
use crate::value::Value;

#[derive(Debug, Default)]
struct BrokerState {
    in_transaction: bool,
    closed: bool,
}

#[derive(Default)]
struct ListenerSet {
    permanent: Vec<Arc<dyn BrokerListener>>,
    /// Dropped when the current transaction ends
    temporary: Vec<Arc<dyn BrokerListener>>,
}

pub struct PersistenceBroker {
    id: Uuid,
    pb_key: PBKey,
    repository: Arc<DescriptorRepository>,
    store: Arc<dyn ObjectStore>,
    cache: MaterializationCache<CacheDistributor>,
    proxy_factory: Arc<ProxyFactory>,
    factory: Weak<BrokerFactory>,
    managed: bool,
    state: Mutex<BrokerState>,
    listeners: Mutex<ListenerSet>,
}

impl PersistenceBroker {
    pub(crate) fn open(
        factory: &BrokerFactory,
        pb_key: PBKey,
        managed: bool,
    ) -> PersistenceResult<Arc<Self>> {
        let broker = Arc::new_cyclic(|weak: &Weak<PersistenceBroker>| {
            let ctx = TierContext::new(
                weak.clone(),
                pb_key.clone(),
                Arc::clone(factory.repository()),
                Arc::clone(factory.registry()),
            );
            PersistenceBroker {
                id: Uuid::new_v4(),
                pb_key: pb_key.clone(),
                repository: Arc::clone(factory.repository()),
                store: Arc::clone(factory.store()),
                cache: MaterializationCache::new(CacheDistributor::new(ctx, factory.config().cache.clone())),
                proxy_factory: Arc::clone(factory.proxy_factory()),
                factory: factory.downgrade(),
                managed,
                state: Mutex::new(BrokerState::default()),
                listeners: Mutex::new(ListenerSet::default()),
            }
        });
        // Unresolvable cache configuration is fatal at creation, not on first lookup
        broker.cache.real().validate()?;
        log::debug!(
            "Opened {}broker {} for {}",
            if managed { "managed " } else { "" },
            broker.id,
            broker.pb_key
        );
        Ok(broker)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pb_key(&self) -> &PBKey {
        &self.pb_key
    }

    pub fn repository(&self) -> &Arc<DescriptorRepository> {
        &self.repository
    }

    /// Cache stack of this broker: the materialization buffer over the distributor
    pub fn cache(&self) -> &MaterializationCache<CacheDistributor> {
        &self.cache
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> PersistenceResult<()> {
        if self.is_closed() {
            Err(PersistenceError::BrokerClosed)
        } else {
            Ok(())
        }
    }

    // Listeners

    /// Register for lifecycle events; non-permanent listeners are dropped
    /// when the current transaction commits or rolls back
    pub fn add_listener(&self, listener: Arc<dyn BrokerListener>, permanent: bool) {
        let mut listeners = self.listeners.lock();
        if permanent {
            listeners.permanent.push(listener);
        } else {
            listeners.temporary.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BrokerListener>) {
        let same = |l: &Arc<dyn BrokerListener>| {
            std::ptr::eq(Arc::as_ptr(l) as *const (), Arc::as_ptr(listener) as *const ())
        };
        let mut listeners = self.listeners.lock();
        listeners.permanent.retain(|l| !same(l));
        listeners.temporary.retain(|l| !same(l));
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.permanent.len() + listeners.temporary.len()
    }

    fn fire(&self, event: BrokerEvent) -> PersistenceResult<()> {
        let snapshot: Vec<Arc<dyn BrokerListener>> = {
            let listeners = self.listeners.lock();
            listeners
                .permanent
                .iter()
                .chain(listeners.temporary.iter())
                .cloned()
                .collect()
        };

        let mut result = Ok(());
        for listener in snapshot {
            if let Err(e) = listener.on_event(event, self) {
                if event.is_lenient() {
                    log::warn!("Listener failed on {} of broker {}: {}", event, self.pb_key, e);
                } else {
                    result = Err(e);
                    break;
                }
            }
        }
        if event.ends_transaction() {
            self.end_transaction_listeners();
        }
        result
    }

    /// Transaction is over: drop temporary listeners, and every listener if
    /// the broker was already closed while the transaction was open
    fn end_transaction_listeners(&self) {
        let closed = self.is_closed();
        let mut listeners = self.listeners.lock();
        listeners.temporary.clear();
        if closed {
            listeners.permanent.clear();
        }
    }

    // Transactions

    pub fn begin_transaction(&self) -> PersistenceResult<()> {
        self.ensure_open()?;
        if self.is_in_transaction() {
            return Err(PersistenceError::Transaction(format!(
                "Broker {} is already in a transaction",
                self.pb_key
            )));
        }
        self.fire(BrokerEvent::BeforeBegin)?;
        self.state.lock().in_transaction = true;
        log::debug!("Broker {} began a transaction", self.pb_key);
        self.fire(BrokerEvent::AfterBegin)
    }

    pub fn commit_transaction(&self) -> PersistenceResult<()> {
        {
            let state = self.state.lock();
            if state.closed && !self.managed {
                return Err(PersistenceError::BrokerClosed);
            }
            if !state.in_transaction {
                return Err(PersistenceError::Transaction(format!(
                    "Commit on broker {} without a transaction",
                    self.pb_key
                )));
            }
        }
        self.fire(BrokerEvent::BeforeCommit)?;
        self.state.lock().in_transaction = false;
        log::debug!("Broker {} committed", self.pb_key);
        self.fire(BrokerEvent::AfterCommit)
    }

    /// Roll back the open transaction; a no-op without one
    ///
    /// Listener failures are logged and never surface from a rollback.
    pub fn abort_transaction(&self) -> PersistenceResult<()> {
        // A rollback can interrupt a materialization, drop whatever it buffered
        self.cache.force_clear();
        if !self.is_in_transaction() {
            return Ok(());
        }
        self.fire(BrokerEvent::BeforeRollback)?;
        self.state.lock().in_transaction = false;
        log::debug!("Broker {} rolled back", self.pb_key);
        self.fire(BrokerEvent::AfterRollback)
    }

    /// Close the broker
    ///
    /// An open transaction is rolled back unless the broker is managed, in
    /// which case it stays open for the external coordinator to finish.
    pub fn close(&self) -> PersistenceResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.is_in_transaction() && !self.managed {
            self.abort_transaction()?;
        }
        self.fire(BrokerEvent::BeforeClose)?;
        self.state.lock().closed = true;
        self.fire(BrokerEvent::AfterClose)?;

        if !self.is_in_transaction() {
            let mut listeners = self.listeners.lock();
            listeners.permanent.clear();
            listeners.temporary.clear();
        }
        log::debug!("Closed broker {} for {}", self.id, self.pb_key);
        Ok(())
    }

    // Identities and proxies

    /// Identity of a `class` instance with the given primary key
    pub fn identity(&self, class: impl Into<ClassName>, pk_values: Vec<Value>) -> PersistenceResult<Identity> {
        let class = class.into();
        self.repository.class_descriptor(&class)?;
        let top = self.repository.top_level_class(&class);
        Ok(Identity::new(class, top, pk_values))
    }

    /// Unmaterialized proxy for `identity`, bound to this broker's key
    pub fn create_proxy(&self, identity: Identity) -> PersistenceResult<Arc<dyn IndirectionProxy>> {
        let cld = self.repository.class_descriptor(identity.real_class())?;
        self.proxy_factory
            .create_proxy(&cld, identity, Some(self.pb_key.clone()), self.factory.clone())
    }

    pub fn create_collection_proxy(&self, query: Query, descriptor: &CollectionDescriptor) -> Arc<CollectionProxy> {
        self.proxy_factory.create_collection_proxy(
            Some(self.pb_key.clone()),
            query,
            descriptor.kind,
            self.factory.clone(),
        )
    }

    // Reads

    /// Object for `identity`, from the cache or the store
    pub fn get_object_by_identity(&self, identity: &Identity) -> PersistenceResult<Option<ObjectRef>> {
        self.ensure_open()?;
        if let Some(object) = self.lookup_in_extent(identity) {
            return Ok(Some(object));
        }

        let scope = self.cache.enter();
        let row = self.store.materialize(identity)?;
        let object = match row {
            Some(row) => Some(self.object_from_row(row)?),
            None => None,
        };
        scope.finish();
        Ok(object)
    }

    /// Cached object for `identity` or for the same key under one of its
    /// subclasses, since rows are cached under their real class
    fn lookup_in_extent(&self, identity: &Identity) -> Option<ObjectRef> {
        if let Some(object) = self.cache.lookup(identity) {
            return Some(object);
        }
        self.repository
            .subclasses_of(identity.real_class())
            .into_iter()
            .find_map(|class| {
                let candidate = Identity::new(
                    class,
                    identity.top_level_class().clone(),
                    identity.pk_values().to_vec(),
                );
                self.cache.lookup(&candidate)
            })
    }

    /// All objects matching `query`, each resolved through the cache
    pub fn get_collection_by_query(&self, query: &Query) -> PersistenceResult<Vec<ObjectRef>> {
        self.ensure_open()?;
        let rows = self.store.query(query)?;

        let scope = self.cache.enter();
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            objects.push(self.object_from_row(row)?);
        }
        scope.finish();
        Ok(objects)
    }

    /// Number of objects `query` would return, without materializing any
    pub fn get_count(&self, query: &Query) -> PersistenceResult<usize> {
        self.ensure_open()?;
        self.store.count(query)
    }

    /// Materialize one row, reusing the cached instance of its identity
    fn object_from_row(&self, row: Row) -> PersistenceResult<ObjectRef> {
        let identity = self.repository.identity_of_row(&row)?;
        if let Some(existing) = self.cache.lookup(&identity) {
            return Ok(existing);
        }

        let cld = self.repository.class_descriptor(&row.class)?;
        let object = ObjectRef::new(PersistentObject::from_row(&row, &cld));
        // Cached before its references resolve so cycles find this instance
        self.cache
            .do_internal_cache(&identity, &object, CacheEntryType::NewMaterialized);
        log::trace!("Materialized {}", identity);

        self.resolve_all(&object, &cld, false)?;
        Ok(object)
    }

    /// Re-resolve every reference and collection of `object`; with
    /// `force_proxies` all of them become proxies regardless of the mapping
    pub fn retrieve_all_references(&self, object: &ObjectRef, force_proxies: bool) -> PersistenceResult<()> {
        self.ensure_open()?;
        let cld = self.repository.class_descriptor(&object.class())?;
        let scope = self.cache.enter();
        self.resolve_all(object, &cld, force_proxies)?;
        scope.finish();
        Ok(())
    }

    /// Resolve the single reference or collection `name` of `object`
    pub fn retrieve_reference(&self, object: &ObjectRef, name: &str) -> PersistenceResult<()> {
        self.ensure_open()?;
        let cld = self.repository.class_descriptor(&object.class())?;
        let scope = self.cache.enter();
        if let Some(reference) = cld.reference(name) {
            self.resolve_reference(object, reference, false)?;
        } else if let Some(collection) = cld.collection(name) {
            self.resolve_collection(object, &cld, collection, false)?;
        } else {
            return Err(PersistenceError::Configuration(format!(
                "Class {} has no reference or collection '{}'",
                cld.class, name
            )));
        }
        scope.finish();
        Ok(())
    }

    fn resolve_all(&self, object: &ObjectRef, cld: &ClassDescriptor, force_proxies: bool) -> PersistenceResult<()> {
        for reference in &cld.references {
            self.resolve_reference(object, reference, force_proxies)?;
        }
        for collection in &cld.collections {
            self.resolve_collection(object, cld, collection, force_proxies)?;
        }
        Ok(())
    }

    fn resolve_reference(
        &self,
        object: &ObjectRef,
        reference: &ReferenceDescriptor,
        force_proxies: bool,
    ) -> PersistenceResult<()> {
        let fk_values: Vec<Value> = {
            let owner = object.read();
            reference
                .foreign_keys
                .iter()
                .map(|fk| owner.field(fk).cloned().unwrap_or(Value::Null))
                .collect()
        };

        let slot = if fk_values.is_empty() || fk_values.iter().any(Value::is_null) {
            ReferenceSlot::Null
        } else {
            let identity = self.identity(reference.target_class.clone(), fk_values)?;
            if reference.lazy || force_proxies {
                ReferenceSlot::Proxy(self.create_proxy(identity)?)
            } else {
                // No lock on the owner is held across the recursion
                match self.get_object_by_identity(&identity)? {
                    Some(target) => ReferenceSlot::Object(target),
                    None => ReferenceSlot::Null,
                }
            }
        };
        object.write().set_reference(&reference.name, slot);
        Ok(())
    }

    fn resolve_collection(
        &self,
        object: &ObjectRef,
        cld: &ClassDescriptor,
        collection: &CollectionDescriptor,
        force_proxies: bool,
    ) -> PersistenceResult<()> {
        let query = self.collection_query(object, cld, collection)?;
        let slot = if collection.lazy || force_proxies {
            CollectionSlot::Proxy(self.create_collection_proxy(query, collection))
        } else {
            let items = self.get_collection_by_query(&query)?;
            CollectionSlot::Loaded(ManagedCollection::from_items(collection.kind, items))
        };
        object.write().set_collection(&collection.name, slot);
        Ok(())
    }

    /// Query selecting the members of `collection` owned by `object`
    fn collection_query(
        &self,
        object: &ObjectRef,
        cld: &ClassDescriptor,
        collection: &CollectionDescriptor,
    ) -> PersistenceResult<Query> {
        let owner = object.read();
        let pks: Vec<&str> = cld.pk_fields().map(|f| f.name.as_str()).collect();
        if pks.len() != collection.inverse_foreign_keys.len() {
            return Err(PersistenceError::Configuration(format!(
                "Collection {}.{} maps {} foreign keys onto {} primary key fields",
                cld.class,
                collection.name,
                collection.inverse_foreign_keys.len(),
                pks.len()
            )));
        }

        let mut query = Query::new(collection.element_class.clone());
        for (fk, pk) in collection.inverse_foreign_keys.iter().zip(pks) {
            let value = owner.field(pk).cloned().unwrap_or(Value::Null);
            query = query.with_criterion(fk, value);
        }
        Ok(query)
    }

    // Writes

    /// Write `object` and cache it as changed in this transaction
    ///
    /// Foreign keys are taken from the referenced objects (a proxy supplies
    /// its identity without materializing), and members removed from
    /// removal-aware collections are deleted.
    pub fn store(&self, object: &ObjectRef) -> PersistenceResult<Identity> {
        self.ensure_open()?;
        if !self.is_in_transaction() {
            return Err(PersistenceError::Transaction(format!(
                "Store on broker {} outside a transaction",
                self.pb_key
            )));
        }
        let cld = self.repository.class_descriptor(&object.class())?;

        self.sync_foreign_keys(object, &cld)?;

        let (identity, row) = {
            let current = object.read();
            (self.repository.identity_of(&current)?, current.to_row(&cld))
        };
        self.store.write(&identity, row)?;

        for removed in self.take_removed_members(object, &cld) {
            let removed_id = self.repository.identity_of(&removed.read())?;
            self.store.delete(&removed_id)?;
            self.cache.remove(&removed_id);
            log::debug!("Deleted {} removed from a collection of {}", removed_id, identity);
        }

        self.cache
            .do_internal_cache(&identity, object, CacheEntryType::Write);
        log::debug!("Stored {}", identity);
        Ok(identity)
    }

    fn sync_foreign_keys(&self, object: &ObjectRef, cld: &ClassDescriptor) -> PersistenceResult<()> {
        let slots: Vec<(&ReferenceDescriptor, ReferenceSlot)> = {
            let current = object.read();
            cld.references
                .iter()
                .filter_map(|r| current.reference(&r.name).map(|slot| (r, slot.clone())))
                .collect()
        };

        let mut updates = Vec::new();
        for (reference, slot) in slots {
            let values = match slot {
                ReferenceSlot::Unresolved => continue,
                ReferenceSlot::Null => vec![Value::Null; reference.foreign_keys.len()],
                ReferenceSlot::Proxy(proxy) => proxy.identity().pk_values().to_vec(),
                ReferenceSlot::Object(target) => {
                    // Self references are read before the owner is locked for writing
                    let target_id = self.repository.identity_of(&target.read())?;
                    target_id.pk_values().to_vec()
                }
            };
            if values.len() != reference.foreign_keys.len() {
                return Err(PersistenceError::Configuration(format!(
                    "Reference {}.{} has {} foreign keys for a {} part key",
                    cld.class,
                    reference.name,
                    reference.foreign_keys.len(),
                    values.len()
                )));
            }
            updates.extend(reference.foreign_keys.iter().cloned().zip(values));
        }

        let mut current = object.write();
        for (fk, value) in updates {
            current.set_field(&fk, value);
        }
        Ok(())
    }

    fn take_removed_members(&self, object: &ObjectRef, cld: &ClassDescriptor) -> Vec<ObjectRef> {
        let mut removed = Vec::new();
        let mut current = object.write();
        for collection in &cld.collections {
            match current.collection_mut(&collection.name) {
                Some(CollectionSlot::Loaded(data)) => removed.extend(data.take_removed()),
                Some(CollectionSlot::Proxy(proxy)) => removed.extend(proxy.take_removed()),
                _ => {}
            }
        }
        removed
    }

    /// Delete `object` from the store and evict it from the cache
    pub fn delete(&self, object: &ObjectRef) -> PersistenceResult<()> {
        self.ensure_open()?;
        if !self.is_in_transaction() {
            return Err(PersistenceError::Transaction(format!(
                "Delete on broker {} outside a transaction",
                self.pb_key
            )));
        }
        let identity = self.repository.identity_of(&object.read())?;
        self.store.delete(&identity)?;
        self.cache.remove(&identity);
        log::debug!("Deleted {}", identity);
        Ok(())
    }
}

impl fmt::Debug for PersistenceBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PersistenceBroker")
            .field("id", &self.id)
            .field("pb_key", &self.pb_key)
            .field("managed", &self.managed)
            .field("in_transaction", &state.in_transaction)
            .field("closed", &state.closed)
            .finish()
    }
}
