// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types shared by the broker, cache tiers and proxies

use thiserror::Error;

use crate::identity::Identity;

#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    /// Fatal setup error: nothing resolvable for a class or connection,
    /// unknown implementation names, missing broker keys.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot instantiate cache '{implementation}': {reason}")]
    CacheInstantiation {
        implementation: String,
        reason: String,
    },

    #[error("No class descriptor for: {0}")]
    ClassNotFound(String),

    #[error("Materialization of {identity} failed: {reason}")]
    Materialization { identity: Identity, reason: String },

    #[error("Loading collection of {class} failed: {reason}")]
    CollectionLoad { class: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Broker is closed")]
    BrokerClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Configuration errors are never worth retrying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PersistenceError::Configuration(_) | PersistenceError::CacheInstantiation { .. }
        )
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
