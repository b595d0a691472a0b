// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lazily loaded 1:n collections
//!
//! A [`CollectionProxy`] holds the query defining its members. `size()` on
//! an unloaded proxy runs a count query and leaves it unloaded; iterating or
//! mutating loads the full collection once. `clear()` on a collection kind
//! that tracks removals loads first so removed members are recorded; other
//! kinds become an empty loaded collection without any I/O.

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

use super::listener::{same_listener, CollectionLoadListener};
use crate::broker::{BrokerFactory, BrokerLease};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::PBKey;
use crate::object::{CollectionKind, ManagedCollection, ObjectRef};
use crate::store::Query;

#[derive(Default)]
struct CollectionState {
    data: Option<ManagedCollection>,
    size: Option<usize>,
}

pub struct CollectionProxy {
    pb_key: Option<PBKey>,
    query: Query,
    kind: CollectionKind,
    factory: Weak<BrokerFactory>,
    state: Mutex<CollectionState>,
    load_lock: ReentrantMutex<()>,
    listeners: Mutex<Vec<Arc<dyn CollectionLoadListener>>>,
}

impl CollectionProxy {
    pub fn new(pb_key: Option<PBKey>, query: Query, kind: CollectionKind, factory: Weak<BrokerFactory>) -> Self {
        Self {
            pb_key,
            query,
            kind,
            factory,
            state: Mutex::new(CollectionState::default()),
            load_lock: ReentrantMutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn pb_key(&self) -> Option<&PBKey> {
        self.pb_key.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().data.is_some()
    }

    /// Backing collection if loaded, never triggers a load
    pub fn loaded_data(&self) -> Option<ManagedCollection> {
        self.state.lock().data.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn CollectionLoadListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CollectionLoadListener>) {
        self.listeners.lock().retain(|l| !same_listener(l, listener));
    }

    fn lease(&self) -> PersistenceResult<BrokerLease> {
        let pb_key = self.pb_key.as_ref().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "Collection proxy over {} has no broker key",
                self.query.target_class
            ))
        })?;
        let factory = self
            .factory
            .upgrade()
            .or_else(BrokerFactory::installed)
            .ok_or_else(|| {
                PersistenceError::Configuration(format!(
                    "No broker factory available to load collection of {}",
                    self.query.target_class
                ))
            })?;
        BrokerLease::acquire(&factory, pb_key)
    }

    fn load_error(&self, error: PersistenceError) -> PersistenceError {
        match error {
            PersistenceError::Configuration(_) => error,
            other => PersistenceError::CollectionLoad {
                class: self.query.target_class.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Number of members; counts in the store without loading when unloaded
    pub fn size(&self) -> PersistenceResult<usize> {
        {
            let state = self.state.lock();
            if let Some(data) = &state.data {
                return Ok(data.len());
            }
            if let Some(size) = state.size {
                return Ok(size);
            }
        }

        let count = {
            let lease = self.lease()?;
            lease.get_count(&self.query).map_err(|e| self.load_error(e))?
        };
        let mut state = self.state.lock();
        // A concurrent load wins over the count
        Ok(match &state.data {
            Some(data) => data.len(),
            None => {
                state.size = Some(count);
                count
            }
        })
    }

    pub fn is_empty(&self) -> PersistenceResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Run the defining query once and retain the result
    pub fn load(&self) -> PersistenceResult<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let _guard = self.load_lock.lock();
        if self.is_loaded() {
            return Ok(());
        }

        let listeners = self.listeners.lock().clone();
        for listener in listeners.iter().rev() {
            listener.before_loading(self);
        }

        log::debug!("Loading collection of {}", self.query.target_class);
        let items = {
            let lease = self.lease()?;
            lease
                .get_collection_by_query(&self.query)
                .map_err(|e| self.load_error(e))?
        };
        let data = ManagedCollection::from_items(self.kind, items);
        {
            let mut state = self.state.lock();
            state.data = Some(data.clone());
            state.size = None;
        }

        let listeners = self.listeners.lock().clone();
        for listener in listeners.iter().rev() {
            listener.after_loading(self, &data);
        }
        Ok(())
    }

    /// Loaded backing collection
    pub fn data(&self) -> PersistenceResult<ManagedCollection> {
        self.with_data(|data| data.clone())
    }

    pub fn items(&self) -> PersistenceResult<Vec<ObjectRef>> {
        self.with_data(|data| data.items().to_vec())
    }

    pub fn iter(&self) -> PersistenceResult<std::vec::IntoIter<ObjectRef>> {
        Ok(self.items()?.into_iter())
    }

    pub fn contains(&self, object: &ObjectRef) -> PersistenceResult<bool> {
        self.with_data(|data| data.contains(object))
    }

    pub fn add(&self, object: ObjectRef) -> PersistenceResult<()> {
        self.with_data(|data| data.add(object))
    }

    pub fn remove(&self, object: &ObjectRef) -> PersistenceResult<bool> {
        self.with_data(|data| data.remove(object))
    }

    pub fn clear(&self) -> PersistenceResult<()> {
        if self.kind.tracks_removals() {
            return self.with_data(ManagedCollection::clear);
        }
        let mut state = self.state.lock();
        state.data = Some(ManagedCollection::new(self.kind));
        state.size = None;
        Ok(())
    }

    /// Members removed since the last store; empty when never loaded
    pub fn take_removed(&self) -> Vec<ObjectRef> {
        self.state
            .lock()
            .data
            .as_mut()
            .map(ManagedCollection::take_removed)
            .unwrap_or_default()
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut ManagedCollection) -> R) -> PersistenceResult<R> {
        self.load()?;
        let mut state = self.state.lock();
        match state.data.as_mut() {
            Some(data) => Ok(f(data)),
            None => Err(PersistenceError::Configuration(format!(
                "Collection of {} was not loaded",
                self.query.target_class
            ))),
        }
    }

    pub fn placeholder(&self) -> CollectionPlaceholder {
        CollectionPlaceholder {
            pb_key: self.pb_key.clone(),
            query: self.query.clone(),
            kind: self.kind,
        }
    }
}

impl fmt::Debug for CollectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionProxy")
            .field("query", &self.query)
            .field("kind", &self.kind)
            .field("loaded", &state.data.is_some())
            .field("size", &state.size)
            .finish()
    }
}

/// Serialized form of an unloaded collection proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPlaceholder {
    pub pb_key: Option<PBKey>,
    pub query: Query,
    pub kind: CollectionKind,
}

impl CollectionPlaceholder {
    pub fn revive(self) -> Arc<CollectionProxy> {
        Arc::new(CollectionProxy::new(self.pb_key, self.query, self.kind, Weak::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PersistentObject;

    fn proxy(kind: CollectionKind) -> CollectionProxy {
        CollectionProxy::new(
            Some(PBKey::new("main")),
            Query::new("shop.Article").with_criterion("group_id", 1),
            kind,
            Weak::new(),
        )
    }

    #[test]
    fn test_clear_of_plain_list_needs_no_io() {
        // No factory is reachable, so any load attempt would fail
        let proxy = proxy(CollectionKind::List);
        proxy.clear().unwrap();
        assert!(proxy.is_loaded());
        assert_eq!(proxy.size().unwrap(), 0);

        let item = ObjectRef::new(PersistentObject::new("shop.Article"));
        proxy.add(item.clone()).unwrap();
        assert!(proxy.contains(&item).unwrap());
    }

    #[test]
    fn test_placeholder_keeps_query() {
        let proxy = proxy(CollectionKind::RemovalAwareList);
        let revived = proxy.placeholder().revive();
        assert_eq!(revived.query(), proxy.query());
        assert_eq!(revived.kind(), CollectionKind::RemovalAwareList);
        assert!(!revived.is_loaded());
    }
}
