// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Persistence broker and broker lifecycle
//!
//! The broker is the consumer of the cache and proxy subsystems: it asks
//! its cache before going to the store, hands out proxies for lazy fields
//! and reports transaction events that the tiers react to.

pub mod event;
pub mod factory;
pub mod lease;
pub mod persistence_broker;

pub use event::{BrokerEvent, BrokerListener};
pub use factory::{BrokerFactory, ThreadBinding};
pub use lease::BrokerLease;
pub use persistence_broker::PersistenceBroker;
