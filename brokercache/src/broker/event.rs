// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Broker lifecycle notifications

use std::fmt;

use super::PersistenceBroker;
use crate::error::PersistenceResult;

/// Transaction and lifecycle events a broker reports to its listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerEvent {
    BeforeBegin,
    AfterBegin,
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
    BeforeClose,
    AfterClose,
}

impl BrokerEvent {
    /// Listener errors for these events are logged and swallowed, so cache
    /// cleanup never masks the rollback or close that triggered it
    pub fn is_lenient(&self) -> bool {
        matches!(
            self,
            BrokerEvent::BeforeRollback
                | BrokerEvent::AfterRollback
                | BrokerEvent::BeforeClose
                | BrokerEvent::AfterClose
        )
    }

    /// Events after which temporary listeners are dropped
    pub fn ends_transaction(&self) -> bool {
        matches!(self, BrokerEvent::AfterCommit | BrokerEvent::AfterRollback)
    }
}

impl fmt::Display for BrokerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerEvent::BeforeBegin => "before-begin",
            BrokerEvent::AfterBegin => "after-begin",
            BrokerEvent::BeforeCommit => "before-commit",
            BrokerEvent::AfterCommit => "after-commit",
            BrokerEvent::BeforeRollback => "before-rollback",
            BrokerEvent::AfterRollback => "after-rollback",
            BrokerEvent::BeforeClose => "before-close",
            BrokerEvent::AfterClose => "after-close",
        };
        f.write_str(name)
    }
}

/// Subscriber to broker events
///
/// Listeners are called without any broker lock held and may call back
/// into the broker.
pub trait BrokerListener: Send + Sync {
    fn on_event(&self, event: BrokerEvent, broker: &PersistenceBroker) -> PersistenceResult<()>;
}
