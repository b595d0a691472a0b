// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Tier that caches nothing

use super::{ObjectCache, ObjectCacheInternal};
use crate::identity::Identity;
use crate::object::ObjectRef;

/// Every call is a no-op; used for excluded classes and `"empty"` descriptors
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCache;

impl ObjectCache for EmptyCache {
    fn cache(&self, _identity: &Identity, _object: &ObjectRef) {}

    /// Nothing is ever stored, so nothing is ever new to it
    fn cache_if_new(&self, _identity: &Identity, _object: &ObjectRef) -> bool {
        false
    }

    fn lookup(&self, _identity: &Identity) -> Option<ObjectRef> {
        None
    }

    fn remove(&self, _identity: &Identity) {}

    fn clear(&self) {}
}

impl ObjectCacheInternal for EmptyCache {
    fn name(&self) -> &'static str {
        super::cache_config::IMPL_EMPTY
    }
}
