//! Store wrapper that runs a hook before every row fetch
//!
//! Lets tests observe shared cache state while a broker is in the middle of
//! materializing a graph, or fail one specific fetch.

use brokercache::{Identity, InMemoryStore, ObjectStore, PersistenceResult, Query, Row};
use parking_lot::Mutex;
use std::sync::Arc;

pub type MaterializeHook = Box<dyn Fn(&Identity) -> PersistenceResult<()> + Send + Sync>;

pub struct HookedStore {
    inner: Arc<InMemoryStore>,
    hook: Mutex<Option<MaterializeHook>>,
}

impl HookedStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hook: Mutex::new(None),
        })
    }

    pub fn set_hook(&self, hook: MaterializeHook) {
        *self.hook.lock() = Some(hook);
    }

    pub fn clear_hook(&self) {
        *self.hook.lock() = None;
    }
}

impl ObjectStore for HookedStore {
    fn materialize(&self, identity: &Identity) -> PersistenceResult<Option<Row>> {
        // Hook runs without the lock held, it may re-enter the store
        let hook = self.hook.lock().take();
        let result = match &hook {
            Some(hook) => hook(identity),
            None => Ok(()),
        };
        if let Some(hook) = hook {
            let mut slot = self.hook.lock();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
        result?;
        self.inner.materialize(identity)
    }

    fn query(&self, query: &Query) -> PersistenceResult<Vec<Row>> {
        self.inner.query(query)
    }

    fn count(&self, query: &Query) -> PersistenceResult<usize> {
        self.inner.count(query)
    }

    fn write(&self, identity: &Identity, row: Row) -> PersistenceResult<()> {
        self.inner.write(identity, row)
    }

    fn delete(&self, identity: &Identity) -> PersistenceResult<()> {
        self.inner.delete(identity)
    }
}
