// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Callbacks around proxy materialization and collection loading
//!
//! Listeners are invoked in reverse registration order for both hooks. The
//! list is snapshotted before invoking, so a listener may deregister itself
//! from inside a callback.

use std::sync::Arc;

use super::collection::CollectionProxy;
use super::handler::IndirectionHandler;
use crate::identity::Identity;
use crate::object::{ManagedCollection, ObjectRef};

pub trait MaterializationListener: Send + Sync {
    fn before_materialization(&self, handler: &IndirectionHandler, identity: &Identity);

    /// `subject` is `None` when the row no longer exists
    fn after_materialization(&self, handler: &IndirectionHandler, subject: Option<&ObjectRef>);
}

pub trait CollectionLoadListener: Send + Sync {
    fn before_loading(&self, proxy: &CollectionProxy);

    fn after_loading(&self, proxy: &CollectionProxy, data: &ManagedCollection);
}

/// Pointer identity of a listener, ignoring the vtable
pub(crate) fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
