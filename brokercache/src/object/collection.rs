// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collections backing 1:n fields

use serde::{Deserialize, Serialize};

use super::ObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CollectionKind {
    #[default]
    List,
    /// Remembers removed members so a later store can delete them
    RemovalAwareList,
}

impl CollectionKind {
    pub fn tracks_removals(&self) -> bool {
        matches!(self, CollectionKind::RemovalAwareList)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedCollection {
    kind: CollectionKind,
    items: Vec<ObjectRef>,
    #[serde(skip)]
    removed: Vec<ObjectRef>,
}

impl ManagedCollection {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn from_items(kind: CollectionKind, items: Vec<ObjectRef>) -> Self {
        Self {
            kind,
            items,
            removed: Vec::new(),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ObjectRef] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObjectRef> {
        self.items.iter()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.items.iter().any(|item| item.ptr_eq(object))
    }

    pub fn add(&mut self, object: ObjectRef) {
        // Re-adding a removed member cancels its pending delete
        self.removed.retain(|r| !r.ptr_eq(&object));
        self.items.push(object);
    }

    pub fn remove(&mut self, object: &ObjectRef) -> bool {
        match self.items.iter().position(|item| item.ptr_eq(object)) {
            Some(pos) => {
                let removed = self.items.remove(pos);
                if self.kind.tracks_removals() {
                    self.removed.push(removed);
                }
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        let drained: Vec<_> = self.items.drain(..).collect();
        if self.kind.tracks_removals() {
            self.removed.extend(drained);
        }
    }

    /// Members removed since the last store
    pub fn removed(&self) -> &[ObjectRef] {
        &self.removed
    }

    pub fn take_removed(&mut self) -> Vec<ObjectRef> {
        std::mem::take(&mut self.removed)
    }
}
