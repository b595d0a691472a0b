// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flat copies exchanged between the session and application tiers

use crate::metadata::ClassDescriptor;
use crate::object::{CollectionSlot, ObjectRef, PersistentObject, ReferenceSlot};

/// Converts live objects to the form stored in the application tier and back
///
/// The flat form holds only the class tag and the mapped field values.
/// References and collections are rebuilt by the broker after `read`.
pub trait CopyStrategy: Send + Sync {
    /// Flat form of `object`; may reuse `previous` (the current application
    /// entry) instead of allocating
    fn write(&self, cld: &ClassDescriptor, object: &ObjectRef, previous: Option<&ObjectRef>) -> ObjectRef;

    /// Fresh, unshared instance built from a flat form
    fn read(&self, cld: &ClassDescriptor, flat: &ObjectRef) -> ObjectRef;

    fn name(&self) -> &'static str;
}

/// Copies every mapped field value
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldCopyStrategy;

impl CopyStrategy for FieldCopyStrategy {
    fn write(&self, cld: &ClassDescriptor, object: &ObjectRef, previous: Option<&ObjectRef>) -> ObjectRef {
        let flat = {
            let source = object.read();
            let mut flat = PersistentObject::new(source.class().clone());
            for name in cld.field_names() {
                if let Some(value) = source.field(name) {
                    flat.set_field(name, value.clone());
                }
            }
            flat
        };

        match previous {
            Some(previous) if !previous.ptr_eq(object) => {
                *previous.write() = flat;
                previous.clone()
            }
            _ => ObjectRef::new(flat),
        }
    }

    fn read(&self, cld: &ClassDescriptor, flat: &ObjectRef) -> ObjectRef {
        let mut object = flat.read().detached_copy();
        for reference in &cld.references {
            object.set_reference(&reference.name, ReferenceSlot::Unresolved);
        }
        for collection in &cld.collections {
            object.set_collection(&collection.name, CollectionSlot::Unresolved);
        }
        ObjectRef::new(object)
    }

    fn name(&self) -> &'static str {
        super::cache_config::COPY_STRATEGY_FIELD_COPY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ReferenceDescriptor;
    use crate::value::Value;

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor::new("shop.Article")
            .with_pk("id")
            .with_field("name")
            .with_field("group_id")
            .with_reference(ReferenceDescriptor::new("group", "shop.Group", &["group_id"]))
    }

    #[test]
    fn test_round_trip_creates_new_instances() {
        let cld = descriptor();
        let live = ObjectRef::new(
            PersistentObject::new("shop.Article")
                .with_field("id", 1)
                .with_field("name", "pen")
                .with_field("group_id", 3),
        );
        live.write().set_reference(
            "group",
            ReferenceSlot::Object(ObjectRef::new(PersistentObject::new("shop.Group"))),
        );

        let strategy = FieldCopyStrategy;
        let flat = strategy.write(&cld, &live, None);
        assert!(flat.read().reference("group").is_none());

        let first = strategy.read(&cld, &flat);
        let second = strategy.read(&cld, &flat);
        assert!(!first.ptr_eq(&second));
        assert!(!first.ptr_eq(&live));
        assert_eq!(first.read().field("name"), Some(&Value::from("pen")));
        assert!(matches!(
            first.read().reference("group"),
            Some(ReferenceSlot::Unresolved)
        ));
    }

    #[test]
    fn test_write_reuses_previous_flat_form() {
        let cld = descriptor();
        let strategy = FieldCopyStrategy;
        let live = ObjectRef::new(PersistentObject::new("shop.Article").with_field("name", "pen"));
        let previous = strategy.write(&cld, &live, None);

        live.write().set_field("name", "ink");
        let updated = strategy.write(&cld, &live, Some(&previous));
        assert!(updated.ptr_eq(&previous));
        assert_eq!(previous.read().field("name"), Some(&Value::from("ink")));
    }
}
