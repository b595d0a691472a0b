// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! State machine behind every single-reference proxy
//!
//! A handler starts unmaterialized. The first call to
//! [`IndirectionHandler::get_real_subject`] notifies the before-listeners,
//! fetches the subject through a broker for the stored key and records it
//! (possibly as "no such row"), then notifies the after-listeners. Once
//! materialized the handler never reverts. A failed fetch leaves it
//! unmaterialized so the next access retries.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};

use super::listener::{same_listener, MaterializationListener};
use crate::broker::{BrokerFactory, BrokerLease};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{Identity, PBKey};
use crate::object::{ObjectRef, ReferenceSlot};

#[derive(Clone)]
enum SubjectState {
    Unmaterialized,
    Materialized(Option<ObjectRef>),
}

pub struct IndirectionHandler {
    pb_key: Option<PBKey>,
    identity: Identity,
    factory: Weak<BrokerFactory>,
    subject: RwLock<SubjectState>,
    materialize_lock: ReentrantMutex<()>,
    listeners: Mutex<Vec<Arc<dyn MaterializationListener>>>,
}

impl IndirectionHandler {
    /// `factory` may be dangling; the installed broker factory is used then
    pub fn new(pb_key: Option<PBKey>, identity: Identity, factory: Weak<BrokerFactory>) -> Self {
        Self {
            pb_key,
            identity,
            factory,
            subject: RwLock::new(SubjectState::Unmaterialized),
            materialize_lock: ReentrantMutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn pb_key(&self) -> Option<&PBKey> {
        self.pb_key.as_ref()
    }

    pub fn already_materialized(&self) -> bool {
        matches!(*self.subject.read(), SubjectState::Materialized(_))
    }

    /// `None` while unmaterialized, `Some(None)` if the row did not exist
    pub fn materialized_subject(&self) -> Option<Option<ObjectRef>> {
        match &*self.subject.read() {
            SubjectState::Unmaterialized => None,
            SubjectState::Materialized(subject) => Some(subject.clone()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn MaterializationListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MaterializationListener>) {
        self.listeners.lock().retain(|l| !same_listener(l, listener));
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn MaterializationListener>> {
        self.listeners.lock().clone()
    }

    /// Real object behind the proxy, materializing it on first access
    pub fn get_real_subject(&self) -> PersistenceResult<Option<ObjectRef>> {
        if let Some(subject) = self.materialized_subject() {
            return Ok(subject);
        }

        let _guard = self.materialize_lock.lock();
        if let Some(subject) = self.materialized_subject() {
            return Ok(subject);
        }

        for listener in self.listener_snapshot().iter().rev() {
            listener.before_materialization(self, &self.identity);
        }

        log::debug!("Materializing proxy for {}", self.identity);
        let subject = self.fetch()?;
        *self.subject.write() = SubjectState::Materialized(subject.clone());
        log::debug!(
            "Materialized {} ({})",
            self.identity,
            if subject.is_some() { "found" } else { "not found" }
        );

        for listener in self.listener_snapshot().iter().rev() {
            listener.after_materialization(self, subject.as_ref());
        }
        Ok(subject)
    }

    fn broker_factory(&self) -> PersistenceResult<Arc<BrokerFactory>> {
        self.factory
            .upgrade()
            .or_else(BrokerFactory::installed)
            .ok_or_else(|| {
                PersistenceError::Configuration(format!(
                    "No broker factory available to materialize {}",
                    self.identity
                ))
            })
    }

    fn fetch(&self) -> PersistenceResult<Option<ObjectRef>> {
        let pb_key = self.pb_key.as_ref().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "Proxy for {} has no broker key",
                self.identity
            ))
        })?;
        let factory = self.broker_factory()?;
        let lease = BrokerLease::acquire(&factory, pb_key)?;
        lease
            .get_object_by_identity(&self.identity)
            .map_err(|e| match e {
                PersistenceError::Configuration(_) => e,
                other => PersistenceError::Materialization {
                    identity: self.identity.clone(),
                    reason: other.to_string(),
                },
            })
    }

    /// Compare the subject with `other`, resolving `other` to its real object
    /// first so that proxy-to-proxy comparisons work
    pub fn equals(&self, other: &ReferenceSlot) -> PersistenceResult<bool> {
        let other = other.resolve()?;
        let subject = self.get_real_subject()?;
        Ok(match (subject, other) {
            (Some(a), Some(b)) => a.ptr_eq(&b) || *a.read() == *b.read(),
            (None, None) => true,
            _ => false,
        })
    }
}

impl fmt::Debug for IndirectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndirectionHandler")
            .field("identity", &self.identity)
            .field("pb_key", &self.pb_key)
            .field("materialized", &self.already_materialized())
            .finish()
    }
}
