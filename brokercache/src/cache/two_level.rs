// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session tier in front of a shared application tier
//!
//! The session tier belongs to one broker and holds live objects. The
//! application tier is shared and holds flat copies only, produced by a
//! [`CopyStrategy`]. Objects written inside a transaction stay in the
//! session until the transaction commits; only then are they pushed to the
//! application tier, so other brokers never see uncommitted state.
//!
//! Entry types in the session:
//! - `NewMaterialized` objects go to the application tier immediately (if
//!   absent there) and are kept in the session as `CachedRead`
//! - `Write` objects are pushed on commit and re-tagged `CachedRead`
//! - `Temp` objects never leave the session and are dropped on commit

use std::sync::{Arc, Weak};

use super::cache_config::{CacheDescriptor, TierConfig, COPY_STRATEGY_FIELD_COPY, IMPL_TWO_LEVEL};
use super::copy_strategy::{CopyStrategy, FieldCopyStrategy};
use super::factory::{create_cache, TierContext};
use super::registry::SharedTable;
use super::table::{EntryOptions, ObjectTable};
use super::{CacheEntryType, ObjectCache, ObjectCacheInternal};
use crate::broker::{BrokerEvent, BrokerListener, PersistenceBroker};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::Identity;
use crate::object::ObjectRef;

const APPLICATION_SCOPE: &str = "two-level:application";

pub struct TwoLevelCache {
    ctx: TierContext,
    session: Arc<ObjectTable<Identity>>,
    application: Arc<dyn ObjectCacheInternal>,
    copy_strategy: Box<dyn CopyStrategy>,
    force_proxies: bool,
}

impl TwoLevelCache {
    /// Build the tier and subscribe it to its broker's transaction events
    pub fn create(ctx: &TierContext, config: &TierConfig) -> PersistenceResult<Arc<dyn ObjectCacheInternal>> {
        let cache = Arc::new(Self::new(ctx, config)?);
        if let Some(broker) = ctx.broker() {
            broker.add_listener(
                Arc::new(SessionSync {
                    cache: Arc::downgrade(&cache),
                }),
                true,
            );
        }
        Ok(cache)
    }

    pub fn new(ctx: &TierContext, config: &TierConfig) -> PersistenceResult<Self> {
        let application_descriptor =
            CacheDescriptor::new(config.application_cache.clone()).with_config(config.clone());
        let application = create_cache(ctx, &application_descriptor, Some(APPLICATION_SCOPE))?;

        let session = Arc::new(ObjectTable::new());
        let private: Arc<dyn SharedTable> = session.clone();
        ctx.registry.register_private(Arc::downgrade(&private));

        Ok(Self {
            ctx: ctx.clone(),
            session,
            application,
            copy_strategy: copy_strategy(&config.copy_strategy)?,
            force_proxies: config.force_proxies,
        })
    }

    pub fn application(&self) -> &Arc<dyn ObjectCacheInternal> {
        &self.application
    }

    pub fn session_len(&self) -> usize {
        self.session.len()
    }

    /// Type tag of the session entry for `identity`
    pub fn session_entry_type(&self, identity: &Identity) -> Option<CacheEntryType> {
        self.session.get_with_type(identity).map(|(_, t)| t)
    }

    fn session_options(entry_type: CacheEntryType) -> EntryOptions {
        EntryOptions::new(true, None).with_type(entry_type)
    }

    fn push_to_application(&self, identity: &Identity, object: &ObjectRef, only_if_new: bool) {
        let class = object.class();
        let cld = match self.ctx.repository.class_descriptor(&class) {
            Ok(cld) => cld,
            Err(e) => {
                log::warn!("Not pushing {} to the application cache: {}", identity, e);
                return;
            }
        };

        if only_if_new {
            if self.application.lookup(identity).is_none() {
                let flat = self.copy_strategy.write(&cld, object, None);
                self.application.cache_if_new(identity, &flat);
            }
        } else {
            let previous = self.application.lookup(identity);
            let flat = self.copy_strategy.write(&cld, object, previous.as_ref());
            self.application.cache(identity, &flat);
        }
    }

    /// Push every `Write` entry to the application tier and drop `Temp` ones
    pub fn after_commit(&self) {
        let written = self.session.entries_of_type(CacheEntryType::Write);
        for (identity, object) in &written {
            self.push_to_application(identity, object, false);
            self.session.retag(identity, CacheEntryType::CachedRead);
        }
        let dropped = self.session.remove_type(CacheEntryType::Temp);
        log::debug!(
            "Two-level commit pushed {} objects, dropped {} temporary entries",
            written.len(),
            dropped
        );
    }

    pub fn after_rollback(&self) {
        self.session.clear();
    }

    fn before_close(&self, broker: &PersistenceBroker) {
        // A managed broker's session must outlive close while its
        // surrounding transaction is still running
        if broker.is_managed() && broker.is_in_transaction() {
            log::debug!("Keeping two-level session of managed broker {}", broker.pb_key());
            return;
        }
        self.session.clear();
    }
}

fn copy_strategy(name: &str) -> PersistenceResult<Box<dyn CopyStrategy>> {
    match name {
        COPY_STRATEGY_FIELD_COPY => Ok(Box::new(FieldCopyStrategy)),
        other => Err(PersistenceError::Configuration(format!(
            "Unknown copy strategy: {}",
            other
        ))),
    }
}

impl ObjectCache for TwoLevelCache {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        self.do_internal_cache(identity, object, CacheEntryType::Unknown);
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        let stored = self.session.put_if_absent(
            identity.clone(),
            object,
            Self::session_options(CacheEntryType::CachedRead),
        );
        if stored {
            self.push_to_application(identity, object, true);
        }
        stored
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        if let Some(object) = self.session.get(identity) {
            return Some(object);
        }

        let flat = self.application.lookup(identity)?;
        let cld = match self.ctx.repository.class_descriptor(&flat.class()) {
            Ok(cld) => cld,
            Err(e) => {
                log::warn!("Ignoring application cache entry {}: {}", identity, e);
                return None;
            }
        };
        let object = self.copy_strategy.read(&cld, &flat);

        // In the session before references resolve, so cycles find it
        self.session.put(
            identity.clone(),
            &object,
            Self::session_options(CacheEntryType::CachedRead),
        );
        if let Some(broker) = self.ctx.broker() {
            if let Err(e) = broker.retrieve_all_references(&object, self.force_proxies) {
                log::warn!(
                    "Cannot rebuild references of {} from the application cache: {}",
                    identity,
                    e
                );
                self.session.remove(identity);
                return None;
            }
        }
        Some(object)
    }

    fn remove(&self, identity: &Identity) {
        self.session.remove(identity);
        self.application.remove(identity);
    }

    fn clear(&self) {
        self.session.clear();
        self.application.clear();
    }
}

impl ObjectCacheInternal for TwoLevelCache {
    fn do_internal_cache(&self, identity: &Identity, object: &ObjectRef, entry_type: CacheEntryType) {
        match entry_type {
            CacheEntryType::NewMaterialized => {
                self.push_to_application(identity, object, true);
                self.session.put(
                    identity.clone(),
                    object,
                    Self::session_options(CacheEntryType::CachedRead),
                );
            }
            other => {
                self.session
                    .put(identity.clone(), object, Self::session_options(other));
            }
        }
    }

    fn name(&self) -> &'static str {
        IMPL_TWO_LEVEL
    }
}

struct SessionSync {
    cache: Weak<TwoLevelCache>,
}

impl BrokerListener for SessionSync {
    fn on_event(&self, event: BrokerEvent, broker: &PersistenceBroker) -> PersistenceResult<()> {
        let cache = match self.cache.upgrade() {
            Some(cache) => cache,
            None => return Ok(()),
        };
        match event {
            BrokerEvent::AfterCommit => cache.after_commit(),
            BrokerEvent::AfterRollback => cache.after_rollback(),
            BrokerEvent::BeforeClose => cache.before_close(broker),
            _ => {}
        }
        Ok(())
    }
}
