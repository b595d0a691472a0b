// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Tier private to one broker

use std::sync::{Arc, Weak};

use super::cache_config::{TierConfig, IMPL_PER_BROKER};
use super::factory::TierContext;
use super::registry::SharedTable;
use super::table::{EntryOptions, ObjectTable};
use super::{ObjectCache, ObjectCacheInternal};
use crate::broker::{BrokerEvent, BrokerListener, PersistenceBroker};
use crate::error::PersistenceResult;
use crate::identity::Identity;
use crate::object::ObjectRef;

/// Soft map owned by a single broker, cleared when that broker closes
pub struct PerBrokerCache {
    table: Arc<ObjectTable<Identity>>,
    options: EntryOptions,
}

struct ClearOnClose {
    table: Weak<ObjectTable<Identity>>,
}

impl BrokerListener for ClearOnClose {
    fn on_event(&self, event: BrokerEvent, broker: &PersistenceBroker) -> PersistenceResult<()> {
        if event == BrokerEvent::AfterClose {
            if let Some(table) = self.table.upgrade() {
                log::debug!(
                    "Clearing {} per-broker cache entries of {}",
                    table.len(),
                    broker.pb_key()
                );
                table.clear();
            }
        }
        Ok(())
    }
}

impl PerBrokerCache {
    pub fn new(ctx: &TierContext, config: &TierConfig) -> Self {
        let table = Arc::new(ObjectTable::new());
        let private: Arc<dyn SharedTable> = table.clone();
        ctx.registry.register_private(Arc::downgrade(&private));

        if let Some(broker) = ctx.broker() {
            broker.add_listener(
                Arc::new(ClearOnClose {
                    table: Arc::downgrade(&table),
                }),
                true,
            );
        }

        Self {
            table,
            options: EntryOptions::new(config.use_soft_references, config.timeout()),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl ObjectCache for PerBrokerCache {
    fn cache(&self, identity: &Identity, object: &ObjectRef) {
        self.table.put(identity.clone(), object, self.options);
    }

    fn cache_if_new(&self, identity: &Identity, object: &ObjectRef) -> bool {
        self.table.put_if_absent(identity.clone(), object, self.options)
    }

    fn lookup(&self, identity: &Identity) -> Option<ObjectRef> {
        self.table.get(identity)
    }

    fn remove(&self, identity: &Identity) {
        self.table.remove(identity);
    }

    fn clear(&self) {
        self.table.clear();
    }
}

impl ObjectCacheInternal for PerBrokerCache {
    fn name(&self) -> &'static str {
        IMPL_PER_BROKER
    }
}
