// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The two reference proxy strategies

use std::fmt;
use std::sync::Arc;

use super::handler::IndirectionHandler;
use super::{IndirectionProxy, ProxyKind};
use crate::identity::ClassName;
use crate::metadata::DescriptorRepository;

/// Proxy exposing only the proxy interfaces declared for its class
pub struct DynamicProxy {
    handler: Arc<IndirectionHandler>,
    declared_class: ClassName,
    interfaces: Vec<ClassName>,
}

impl DynamicProxy {
    pub fn new(handler: Arc<IndirectionHandler>, declared_class: ClassName, interfaces: Vec<ClassName>) -> Self {
        Self {
            handler,
            declared_class,
            interfaces,
        }
    }
}

impl IndirectionProxy for DynamicProxy {
    fn handler(&self) -> &Arc<IndirectionHandler> {
        &self.handler
    }

    fn kind(&self) -> ProxyKind {
        ProxyKind::Dynamic
    }

    fn declared_class(&self) -> &ClassName {
        &self.declared_class
    }

    fn is_instance_of(&self, class: &ClassName, _repository: &DescriptorRepository) -> bool {
        self.interfaces.contains(class)
    }

    fn interfaces(&self) -> Vec<ClassName> {
        self.interfaces.clone()
    }
}

impl fmt::Debug for DynamicProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicProxy")
            .field("interfaces", &self.interfaces)
            .field("handler", &self.handler)
            .finish()
    }
}

/// Proxy standing in for its base class and every superclass of it
pub struct SubclassProxy {
    handler: Arc<IndirectionHandler>,
    base_class: ClassName,
}

impl SubclassProxy {
    pub fn new(handler: Arc<IndirectionHandler>, base_class: ClassName) -> Self {
        Self {
            handler,
            base_class,
        }
    }
}

impl IndirectionProxy for SubclassProxy {
    fn handler(&self) -> &Arc<IndirectionHandler> {
        &self.handler
    }

    fn kind(&self) -> ProxyKind {
        ProxyKind::Subclass
    }

    fn declared_class(&self) -> &ClassName {
        &self.base_class
    }

    fn is_instance_of(&self, class: &ClassName, repository: &DescriptorRepository) -> bool {
        repository.is_assignable(class, &self.base_class)
    }
}

impl fmt::Debug for SubclassProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubclassProxy")
            .field("base_class", &self.base_class)
            .field("handler", &self.handler)
            .finish()
    }
}
