// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Materialized persistent objects
//!
//! A [`PersistentObject`] holds the mapped field values of one row plus its
//! resolved (or lazily proxied) references and collections. Objects are
//! shared through [`ObjectRef`]; two `ObjectRef`s are the same object only
//! if they point at the same allocation, which is what the cache tiers keep
//! unique per identity.

pub mod collection;

pub use collection::{CollectionKind, ManagedCollection};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::PersistenceResult;
use crate::identity::ClassName;
use crate::metadata::ClassDescriptor;
use crate::proxy::{CollectionPlaceholder, CollectionProxy, IndirectionProxy, ProxyPlaceholder};
use crate::store::Row;
use crate::value::Value;

/// State of a single-valued reference field
#[derive(Clone, Default)]
pub enum ReferenceSlot {
    /// Not resolved yet (fresh from a row, a flat copy or a cyclic serialization)
    #[default]
    Unresolved,
    Null,
    Object(ObjectRef),
    Proxy(Arc<dyn IndirectionProxy>),
}

/// State of a collection field
#[derive(Clone, Default)]
pub enum CollectionSlot {
    #[default]
    Unresolved,
    Loaded(ManagedCollection),
    Proxy(Arc<CollectionProxy>),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PersistentObject {
    class: ClassName,
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    references: BTreeMap<String, ReferenceSlot>,
    #[serde(default)]
    collections: BTreeMap<String, CollectionSlot>,
}

impl PersistentObject {
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self {
            class: class.into(),
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Object for a freshly fetched row; references and collections start unresolved
    pub fn from_row(row: &Row, cld: &ClassDescriptor) -> Self {
        let mut object = PersistentObject::new(row.class.clone());
        for name in cld.field_names() {
            let value = row.values.get(name).cloned().unwrap_or(Value::Null);
            object.fields.insert(name.to_string(), value);
        }
        for reference in &cld.references {
            object
                .references
                .insert(reference.name.clone(), ReferenceSlot::Unresolved);
        }
        for collection in &cld.collections {
            object
                .collections
                .insert(collection.name.clone(), CollectionSlot::Unresolved);
        }
        object
    }

    /// Row holding the mapped fields of this object
    pub fn to_row(&self, cld: &ClassDescriptor) -> Row {
        let mut row = Row::new(self.class.clone());
        for name in cld.field_names() {
            let value = self.fields.get(name).cloned().unwrap_or(Value::Null);
            row.values.insert(name.to_string(), value);
        }
        row
    }

    pub fn class(&self) -> &ClassName {
        &self.class
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceSlot> {
        self.references.get(name)
    }

    pub fn set_reference(&mut self, name: &str, slot: ReferenceSlot) {
        self.references.insert(name.to_string(), slot);
    }

    pub fn references(&self) -> impl Iterator<Item = (&String, &ReferenceSlot)> {
        self.references.iter()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSlot> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionSlot> {
        self.collections.get_mut(name)
    }

    pub fn set_collection(&mut self, name: &str, slot: CollectionSlot) {
        self.collections.insert(name.to_string(), slot);
    }

    pub fn collections(&self) -> impl Iterator<Item = (&String, &CollectionSlot)> {
        self.collections.iter()
    }

    /// Copy of class and fields only, every reference and collection unresolved
    pub fn detached_copy(&self) -> PersistentObject {
        PersistentObject {
            class: self.class.clone(),
            fields: self.fields.clone(),
            references: self
                .references
                .keys()
                .map(|k| (k.clone(), ReferenceSlot::Unresolved))
                .collect(),
            collections: self
                .collections
                .keys()
                .map(|k| (k.clone(), CollectionSlot::Unresolved))
                .collect(),
        }
    }
}

/// Structural equality over class and field values; references are not compared
impl PartialEq for PersistentObject {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.fields == other.fields
    }
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reference targets are not printed, object graphs may be cyclic
        f.debug_struct("PersistentObject")
            .field("class", &self.class)
            .field("fields", &self.fields)
            .field("references", &self.references.keys().collect::<Vec<_>>())
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared handle to a materialized object
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<PersistentObject>>);

impl ObjectRef {
    pub fn new(object: PersistentObject) -> Self {
        ObjectRef(Arc::new(RwLock::new(object)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PersistentObject> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, PersistentObject> {
        self.0.write()
    }

    /// Same object, not merely equal state
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    /// Number of strong handles, the cache's own included
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn class(&self) -> ClassName {
        self.0.read().class.clone()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(object) => write!(f, "ObjectRef({} {:?})", object.class, object.fields),
            None => write!(f, "ObjectRef(<locked>)"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WeakObjectRef(Weak<RwLock<PersistentObject>>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl ReferenceSlot {
    pub fn is_proxy(&self) -> bool {
        matches!(self, ReferenceSlot::Proxy(_))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ReferenceSlot::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Arc<dyn IndirectionProxy>> {
        match self {
            ReferenceSlot::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Real object behind this slot, materializing a proxy if needed
    pub fn resolve(&self) -> PersistenceResult<Option<ObjectRef>> {
        match self {
            ReferenceSlot::Unresolved | ReferenceSlot::Null => Ok(None),
            ReferenceSlot::Object(obj) => Ok(Some(obj.clone())),
            ReferenceSlot::Proxy(proxy) => proxy.real_subject(),
        }
    }
}

impl fmt::Debug for ReferenceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSlot::Unresolved => write!(f, "Unresolved"),
            ReferenceSlot::Null => write!(f, "Null"),
            ReferenceSlot::Object(obj) => write!(f, "Object({:?})", obj),
            ReferenceSlot::Proxy(proxy) => write!(f, "Proxy({:?})", proxy),
        }
    }
}

impl CollectionSlot {
    pub fn is_proxy(&self) -> bool {
        matches!(self, CollectionSlot::Proxy(_))
    }

    pub fn as_proxy(&self) -> Option<&Arc<CollectionProxy>> {
        match self {
            CollectionSlot::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Members of the collection, loading a proxy if needed
    pub fn items(&self) -> PersistenceResult<Vec<ObjectRef>> {
        match self {
            CollectionSlot::Unresolved => Ok(Vec::new()),
            CollectionSlot::Loaded(collection) => Ok(collection.items().to_vec()),
            CollectionSlot::Proxy(proxy) => proxy.items(),
        }
    }
}

impl fmt::Debug for CollectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionSlot::Unresolved => write!(f, "Unresolved"),
            CollectionSlot::Loaded(c) => write!(f, "Loaded({} items)", c.len()),
            CollectionSlot::Proxy(proxy) => write!(f, "Proxy({:?})", proxy),
        }
    }
}

// Serialization
//
// Objects already being written higher up in the graph are emitted as
// `Unresolved`, which keeps cyclic graphs finite. Proxies never materialize
// while being written.

thread_local! {
    static IN_PROGRESS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

pub(crate) struct VisitGuard(usize);

impl VisitGuard {
    /// `None` if the object is already being written on this thread
    pub(crate) fn enter(object: &ObjectRef) -> Option<VisitGuard> {
        let addr = object.addr();
        let inserted = IN_PROGRESS.with(|set| set.borrow_mut().insert(addr));
        if inserted {
            Some(VisitGuard(addr))
        } else {
            None
        }
    }

    pub(crate) fn is_visiting(object: &ObjectRef) -> bool {
        let addr = object.addr();
        IN_PROGRESS.with(|set| set.borrow().contains(&addr))
    }
}

impl Drop for VisitGuard {
    fn drop(&mut self) {
        IN_PROGRESS.with(|set| {
            set.borrow_mut().remove(&self.0);
        });
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let _guard = VisitGuard::enter(self);
        let object = self.read();
        object.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PersistentObject::deserialize(deserializer).map(ObjectRef::new)
    }
}

#[derive(Serialize)]
#[serde(rename = "ReferenceSlot")]
enum ReferenceFormRef<'a> {
    Unresolved,
    Null,
    Object(&'a PersistentObject),
    Proxy(ProxyPlaceholder),
}

#[derive(Deserialize)]
#[serde(rename = "ReferenceSlot")]
enum ReferenceForm {
    Unresolved,
    Null,
    Object(Box<PersistentObject>),
    Proxy(ProxyPlaceholder),
}

fn serialize_target<S: Serializer>(target: &ObjectRef, serializer: S) -> Result<S::Ok, S::Error> {
    match VisitGuard::enter(target) {
        Some(_guard) => {
            let object = target.read();
            ReferenceFormRef::Object(&*object).serialize(serializer)
        }
        None => ReferenceFormRef::Unresolved.serialize(serializer),
    }
}

impl Serialize for ReferenceSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReferenceSlot::Unresolved => ReferenceFormRef::Unresolved.serialize(serializer),
            ReferenceSlot::Null => ReferenceFormRef::Null.serialize(serializer),
            ReferenceSlot::Object(target) => serialize_target(target, serializer),
            ReferenceSlot::Proxy(proxy) => match proxy.handler().materialized_subject() {
                // A materialized proxy is written as its real subject
                Some(Some(subject)) => serialize_target(&subject, serializer),
                Some(None) => ReferenceFormRef::Null.serialize(serializer),
                None => ReferenceFormRef::Proxy(proxy.placeholder()).serialize(serializer),
            },
        }
    }
}

impl<'de> Deserialize<'de> for ReferenceSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ReferenceForm::deserialize(deserializer)? {
            ReferenceForm::Unresolved => ReferenceSlot::Unresolved,
            ReferenceForm::Null => ReferenceSlot::Null,
            ReferenceForm::Object(object) => ReferenceSlot::Object(ObjectRef::new(*object)),
            ReferenceForm::Proxy(placeholder) => ReferenceSlot::Proxy(placeholder.revive()),
        })
    }
}

#[derive(Serialize)]
#[serde(rename = "CollectionSlot")]
enum CollectionFormRef<'a> {
    Unresolved,
    Loaded(&'a ManagedCollection),
    Proxy(CollectionPlaceholder),
}

#[derive(Deserialize)]
#[serde(rename = "CollectionSlot")]
enum CollectionForm {
    Unresolved,
    Loaded(ManagedCollection),
    Proxy(CollectionPlaceholder),
}

fn serialize_collection<S: Serializer>(
    collection: &ManagedCollection,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    // A member already being written means the collection closes a cycle
    if collection.iter().any(VisitGuard::is_visiting) {
        CollectionFormRef::Unresolved.serialize(serializer)
    } else {
        CollectionFormRef::Loaded(collection).serialize(serializer)
    }
}

impl Serialize for CollectionSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CollectionSlot::Unresolved => CollectionFormRef::Unresolved.serialize(serializer),
            CollectionSlot::Loaded(collection) => serialize_collection(collection, serializer),
            CollectionSlot::Proxy(proxy) => match proxy.loaded_data() {
                Some(collection) => serialize_collection(&collection, serializer),
                None => CollectionFormRef::Proxy(proxy.placeholder()).serialize(serializer),
            },
        }
    }
}

impl<'de> Deserialize<'de> for CollectionSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match CollectionForm::deserialize(deserializer)? {
            CollectionForm::Unresolved => CollectionSlot::Unresolved,
            CollectionForm::Loaded(collection) => CollectionSlot::Loaded(collection),
            CollectionForm::Proxy(placeholder) => CollectionSlot::Proxy(placeholder.revive()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: i64, name: &str) -> ObjectRef {
        ObjectRef::new(
            PersistentObject::new("people.Person")
                .with_field("id", id)
                .with_field("name", name),
        )
    }

    #[test]
    fn test_ptr_eq_versus_state_equality() {
        let a = person(1, "Ada");
        let b = person(1, "Ada");
        assert!(!a.ptr_eq(&b));
        assert_eq!(*a.read(), *b.read());
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn test_weak_ref_does_not_keep_object_alive() {
        let a = person(1, "Ada");
        let weak = a.downgrade();
        assert!(weak.upgrade().is_some());
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_cyclic_graph_serializes_finitely() {
        let a = person(1, "Ada");
        let b = person(2, "Bob");
        a.write()
            .set_reference("friend", ReferenceSlot::Object(b.clone()));
        b.write()
            .set_reference("friend", ReferenceSlot::Object(a.clone()));

        let json = serde_json::to_string(&a).unwrap();
        let copy: ObjectRef = serde_json::from_str(&json).unwrap();

        let copy = copy.read();
        let friend = copy.reference("friend").and_then(|s| s.as_object()).unwrap();
        assert_eq!(friend.read().field("name"), Some(&Value::from("Bob")));
        // Back edge to the root is cut
        assert!(matches!(
            friend.read().reference("friend"),
            Some(ReferenceSlot::Unresolved)
        ));
    }

    #[test]
    fn test_cyclic_collection_is_cut() {
        let group = ObjectRef::new(PersistentObject::new("shop.Group").with_field("id", 1));
        let article = ObjectRef::new(PersistentObject::new("shop.Article").with_field("id", 7));
        article
            .write()
            .set_reference("group", ReferenceSlot::Object(group.clone()));
        group.write().set_collection(
            "articles",
            CollectionSlot::Loaded(ManagedCollection::from_items(
                CollectionKind::List,
                vec![article.clone()],
            )),
        );

        let json = serde_json::to_string(&article).unwrap();
        let copy: ObjectRef = serde_json::from_str(&json).unwrap();
        let copy = copy.read();
        let group_copy = copy.reference("group").and_then(|s| s.as_object()).unwrap();
        assert!(matches!(
            group_copy.read().collection("articles"),
            Some(CollectionSlot::Unresolved)
        ));
    }

    #[test]
    fn test_detached_copy_drops_references() {
        let a = person(1, "Ada");
        a.write()
            .set_reference("friend", ReferenceSlot::Object(person(2, "Bob")));
        let copy = a.read().detached_copy();
        assert!(matches!(
            copy.reference("friend"),
            Some(ReferenceSlot::Unresolved)
        ));
        assert_eq!(copy, *a.read());
    }
}
