// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Mapping metadata consumed by the broker and the cache tiers
//!
//! Loading descriptors from mapping files is out of scope; callers build a
//! [`DescriptorRepository`] programmatically or deserialize it with serde.

pub mod descriptors;

pub use descriptors::{
    ClassDescriptor, CollectionDescriptor, ConnectionDescriptor, FieldDescriptor,
    ReferenceDescriptor,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::identity::{ClassName, Identity};
use crate::object::PersistentObject;
use crate::store::Row;
use crate::value::Value;

/// All class and connection descriptors of one mapping repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRepository {
    /// Distinguishes repository instances when caching keys include it
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    classes: HashMap<ClassName, Arc<ClassDescriptor>>,
    connections: HashMap<String, ConnectionDescriptor>,
}

impl Default for DescriptorRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRepository {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            classes: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_class(&mut self, descriptor: ClassDescriptor) {
        self.classes
            .insert(descriptor.class.clone(), Arc::new(descriptor));
    }

    pub fn add_connection(&mut self, descriptor: ConnectionDescriptor) {
        self.connections
            .insert(descriptor.jcd_alias.clone(), descriptor);
    }

    pub fn class_descriptor(&self, class: &ClassName) -> PersistenceResult<Arc<ClassDescriptor>> {
        self.classes
            .get(class)
            .cloned()
            .ok_or_else(|| PersistenceError::ClassNotFound(class.to_string()))
    }

    pub fn has_class(&self, class: &ClassName) -> bool {
        self.classes.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassDescriptor>> {
        self.classes.values()
    }

    pub fn connection(&self, jcd_alias: &str) -> Option<&ConnectionDescriptor> {
        self.connections.get(jcd_alias)
    }

    /// Walks `super_class` links up to the topmost mapped class
    pub fn top_level_class(&self, class: &ClassName) -> ClassName {
        let mut current = class.clone();
        // Bounded by the class count so a malformed cyclic hierarchy cannot spin
        for _ in 0..=self.classes.len() {
            match self
                .classes
                .get(&current)
                .and_then(|cld| cld.super_class.clone())
            {
                Some(parent) if self.classes.contains_key(&parent) => current = parent,
                _ => break,
            }
        }
        current
    }

    /// True if `class` is `target` or one of its mapped subclasses
    pub fn is_assignable(&self, target: &ClassName, class: &ClassName) -> bool {
        let mut current = Some(class.clone());
        let mut steps = 0;
        while let Some(name) = current {
            if &name == target {
                return true;
            }
            steps += 1;
            if steps > self.classes.len() {
                return false;
            }
            current = self
                .classes
                .get(&name)
                .and_then(|cld| cld.super_class.clone());
        }
        false
    }

    /// Mapped classes assignable to `target`, excluding `target` itself
    pub fn subclasses_of(&self, target: &ClassName) -> Vec<ClassName> {
        self.classes
            .keys()
            .filter(|class| *class != target && self.is_assignable(target, class))
            .cloned()
            .collect()
    }

    /// Builds the identity of an object from its primary-key fields
    pub fn identity_of(&self, object: &PersistentObject) -> PersistenceResult<Identity> {
        self.identity_from_values(object.class(), |name| object.field(name).cloned())
    }

    pub fn identity_of_row(&self, row: &Row) -> PersistenceResult<Identity> {
        self.identity_from_values(&row.class, |name| row.values.get(name).cloned())
    }

    fn identity_from_values<F>(&self, class: &ClassName, lookup: F) -> PersistenceResult<Identity>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let cld = self.class_descriptor(class)?;
        let pk_values = cld
            .pk_fields()
            .map(|field| lookup(&field.name).unwrap_or(Value::Null))
            .collect();
        Ok(Identity::new(
            class.clone(),
            self.top_level_class(class),
            pk_values,
        ))
    }
}
