// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lazy materialization through proxies
//!
//! A lazy reference field holds an [`IndirectionProxy`] instead of the real
//! object. Both proxy strategies ([`DynamicProxy`], [`SubclassProxy`]) share
//! one [`IndirectionHandler`] implementation and differ only in which types
//! they claim to stand in for. Lazy collections are backed by a
//! [`CollectionProxy`] that can report its size without loading.

pub mod collection;
pub mod factory;
pub mod handler;
pub mod listener;
pub mod reference;

pub use collection::{CollectionPlaceholder, CollectionProxy};
pub use factory::ProxyFactory;
pub use handler::IndirectionHandler;
pub use listener::{CollectionLoadListener, MaterializationListener};
pub use reference::{DynamicProxy, SubclassProxy};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::PersistenceResult;
use crate::identity::{ClassName, Identity, PBKey};
use crate::metadata::DescriptorRepository;
use crate::object::{ObjectRef, ReferenceSlot};

/// Proxy construction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyKind {
    /// Stands in for the declared proxy interfaces of the class only
    Dynamic,
    /// Stands in for the class itself and all of its superclasses
    Subclass,
}

/// Polymorphic indirection shared by all proxy strategies
pub trait IndirectionProxy: Send + Sync + fmt::Debug {
    fn handler(&self) -> &Arc<IndirectionHandler>;

    fn kind(&self) -> ProxyKind;

    /// Class the proxy was created for
    fn declared_class(&self) -> &ClassName;

    /// Whether the proxy can be used where `class` is expected, answered
    /// without materializing
    fn is_instance_of(&self, class: &ClassName, repository: &DescriptorRepository) -> bool;

    /// Interfaces recorded in a serialized placeholder
    fn interfaces(&self) -> Vec<ClassName> {
        Vec::new()
    }

    fn identity(&self) -> &Identity {
        self.handler().identity()
    }

    fn real_subject(&self) -> PersistenceResult<Option<ObjectRef>> {
        self.handler().get_real_subject()
    }

    fn already_materialized(&self) -> bool {
        self.handler().already_materialized()
    }

    fn equals(&self, other: &ReferenceSlot) -> PersistenceResult<bool> {
        self.handler().equals(other)
    }

    /// Lightweight stand-in written instead of an unmaterialized proxy
    fn placeholder(&self) -> ProxyPlaceholder {
        ProxyPlaceholder {
            kind: self.kind(),
            declared_class: self.declared_class().clone(),
            interfaces: self.interfaces(),
            identity: self.identity().clone(),
            pb_key: self.handler().pb_key().cloned(),
        }
    }
}

/// Serialized form of an unmaterialized proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyPlaceholder {
    pub kind: ProxyKind,
    pub declared_class: ClassName,
    #[serde(default)]
    pub interfaces: Vec<ClassName>,
    pub identity: Identity,
    pub pb_key: Option<PBKey>,
}

impl ProxyPlaceholder {
    /// Fresh unmaterialized proxy; it will find a broker through the
    /// installed broker factory when first accessed
    pub fn revive(self) -> Arc<dyn IndirectionProxy> {
        let handler = Arc::new(IndirectionHandler::new(self.pb_key, self.identity, Weak::new()));
        match self.kind {
            ProxyKind::Dynamic => Arc::new(DynamicProxy::new(handler, self.declared_class, self.interfaces)),
            ProxyKind::Subclass => Arc::new(SubclassProxy::new(handler, self.declared_class)),
        }
    }
}
