// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Scoped broker acquisition for proxies

use std::ops::Deref;
use std::sync::Arc;

use super::{BrokerFactory, PersistenceBroker};
use crate::error::PersistenceResult;
use crate::identity::PBKey;

/// Broker used for one proxy fetch
///
/// A broker bound to the current thread is reused and left open. Otherwise
/// a temporary broker is created and closed when the lease drops, on the
/// success and the error path alike.
pub enum BrokerLease {
    Bound(Arc<PersistenceBroker>),
    Temporary(Arc<PersistenceBroker>),
}

impl BrokerLease {
    pub fn acquire(factory: &Arc<BrokerFactory>, pb_key: &PBKey) -> PersistenceResult<Self> {
        match factory.current_broker(pb_key) {
            Some(broker) => Ok(BrokerLease::Bound(broker)),
            None => {
                log::debug!("No broker bound for {}, opening a temporary one", pb_key);
                Ok(BrokerLease::Temporary(factory.create_broker(pb_key.clone())?))
            }
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, BrokerLease::Temporary(_))
    }

    pub fn broker(&self) -> &Arc<PersistenceBroker> {
        match self {
            BrokerLease::Bound(broker) | BrokerLease::Temporary(broker) => broker,
        }
    }
}

impl Deref for BrokerLease {
    type Target = PersistenceBroker;

    fn deref(&self) -> &PersistenceBroker {
        self.broker()
    }
}

impl Drop for BrokerLease {
    fn drop(&mut self) {
        if let BrokerLease::Temporary(broker) = self {
            if let Err(e) = broker.close() {
                log::warn!("Failed to close temporary broker {}: {}", broker.pb_key(), e);
            }
        }
    }
}
