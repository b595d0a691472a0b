// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Class, field, reference and connection descriptors

use serde::{Deserialize, Serialize};

use crate::cache::cache_config::CacheDescriptor;
use crate::identity::ClassName;
use crate::object::CollectionKind;

/// Mapped field of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub primary_key: bool,
}

/// 1:1 / n:1 reference resolved through foreign-key fields of the owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub name: String,
    pub target_class: ClassName,
    /// Owner fields holding the target's primary-key values, in pk order
    pub foreign_keys: Vec<String>,
    /// Populate the slot with a proxy instead of loading the target
    #[serde(default)]
    pub lazy: bool,
}

/// 1:n collection resolved through foreign-key fields of the elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    pub element_class: ClassName,
    /// Element fields pointing back at the owner's primary key, in pk order
    pub inverse_foreign_keys: Vec<String>,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub kind: CollectionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub class: ClassName,
    #[serde(default)]
    pub super_class: Option<ClassName>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub references: Vec<ReferenceDescriptor>,
    #[serde(default)]
    pub collections: Vec<CollectionDescriptor>,
    /// Interfaces a dynamic proxy of this class exposes
    #[serde(default)]
    pub proxy_interfaces: Vec<ClassName>,
    /// Per-class cache configuration, overrides the connection's
    #[serde(default)]
    pub cache: Option<CacheDescriptor>,
}

impl ClassDescriptor {
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self {
            class: class.into(),
            super_class: None,
            fields: Vec::new(),
            references: Vec::new(),
            collections: Vec::new(),
            proxy_interfaces: Vec::new(),
            cache: None,
        }
    }

    pub fn extends(mut self, super_class: impl Into<ClassName>) -> Self {
        self.super_class = Some(super_class.into());
        self
    }

    pub fn with_pk(mut self, name: &str) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            primary_key: true,
        });
        self
    }

    pub fn with_field(mut self, name: &str) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            primary_key: false,
        });
        self
    }

    pub fn with_reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    pub fn with_collection(mut self, collection: CollectionDescriptor) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_proxy_interface(mut self, interface: impl Into<ClassName>) -> Self {
        self.proxy_interfaces.push(interface.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheDescriptor) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pk_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }
}

impl ReferenceDescriptor {
    pub fn new(name: &str, target_class: impl Into<ClassName>, foreign_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            target_class: target_class.into(),
            foreign_keys: foreign_keys.iter().map(|s| s.to_string()).collect(),
            lazy: false,
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}

impl CollectionDescriptor {
    pub fn new(
        name: &str,
        element_class: impl Into<ClassName>,
        inverse_foreign_keys: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            element_class: element_class.into(),
            inverse_foreign_keys: inverse_foreign_keys.iter().map(|s| s.to_string()).collect(),
            lazy: false,
            kind: CollectionKind::default(),
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn with_kind(mut self, kind: CollectionKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Connection (jcd alias) level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub jcd_alias: String,
    #[serde(default)]
    pub cache: Option<CacheDescriptor>,
}

impl ConnectionDescriptor {
    pub fn new(jcd_alias: impl Into<String>) -> Self {
        Self {
            jcd_alias: jcd_alias.into(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheDescriptor) -> Self {
        self.cache = Some(cache);
        self
    }
}
