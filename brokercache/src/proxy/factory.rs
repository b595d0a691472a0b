// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Proxy creation according to the configured strategy

use std::sync::{Arc, Weak};

use super::collection::CollectionProxy;
use super::handler::IndirectionHandler;
use super::reference::{DynamicProxy, SubclassProxy};
use super::{IndirectionProxy, ProxyKind};
use crate::broker::BrokerFactory;
use crate::config::{ProxySettings, COLLECTION_PROXY_DEFAULT, PROXY_DYNAMIC, PROXY_SUBCLASS};
use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{Identity, PBKey};
use crate::metadata::{ClassDescriptor, DescriptorRepository};
use crate::object::CollectionKind;
use crate::store::Query;

#[derive(Debug, Clone)]
pub struct ProxyFactory {
    reference_kind: ProxyKind,
}

impl ProxyFactory {
    pub fn new(settings: &ProxySettings) -> PersistenceResult<Self> {
        let reference_kind = match settings.reference_proxy.as_str() {
            PROXY_DYNAMIC => ProxyKind::Dynamic,
            PROXY_SUBCLASS => ProxyKind::Subclass,
            other => {
                return Err(PersistenceError::Configuration(format!(
                    "Unknown reference proxy strategy '{}'",
                    other
                )))
            }
        };
        if settings.collection_proxy != COLLECTION_PROXY_DEFAULT {
            return Err(PersistenceError::Configuration(format!(
                "Unknown collection proxy '{}'",
                settings.collection_proxy
            )));
        }
        Ok(Self { reference_kind })
    }

    pub fn reference_kind(&self) -> ProxyKind {
        self.reference_kind
    }

    /// Every lazily referenced class must be proxyable with this strategy
    pub fn validate(&self, repository: &DescriptorRepository) -> PersistenceResult<()> {
        if self.reference_kind != ProxyKind::Dynamic {
            return Ok(());
        }
        for cld in repository.classes() {
            for reference in cld.references.iter().filter(|r| r.lazy) {
                let target = repository.class_descriptor(&reference.target_class)?;
                if target.proxy_interfaces.is_empty() {
                    return Err(no_interfaces(&target));
                }
            }
        }
        Ok(())
    }

    /// Proxy for `identity`, declared as an instance of `target`
    pub fn create_proxy(
        &self,
        target: &ClassDescriptor,
        identity: Identity,
        pb_key: Option<PBKey>,
        factory: Weak<BrokerFactory>,
    ) -> PersistenceResult<Arc<dyn IndirectionProxy>> {
        let handler = Arc::new(IndirectionHandler::new(pb_key, identity, factory));
        Ok(match self.reference_kind {
            ProxyKind::Dynamic => {
                if target.proxy_interfaces.is_empty() {
                    return Err(no_interfaces(target));
                }
                Arc::new(DynamicProxy::new(
                    handler,
                    target.class.clone(),
                    target.proxy_interfaces.clone(),
                ))
            }
            ProxyKind::Subclass => Arc::new(SubclassProxy::new(handler, target.class.clone())),
        })
    }

    pub fn create_collection_proxy(
        &self,
        pb_key: Option<PBKey>,
        query: Query,
        kind: CollectionKind,
        factory: Weak<BrokerFactory>,
    ) -> Arc<CollectionProxy> {
        Arc::new(CollectionProxy::new(pb_key, query, kind, factory))
    }
}

fn no_interfaces(cld: &ClassDescriptor) -> PersistenceError {
    PersistenceError::Configuration(format!(
        "Class {} declares no proxy interfaces, cannot create a dynamic proxy",
        cld.class
    ))
}
