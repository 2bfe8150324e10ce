use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

/// Handle returned on callback registration, used to remove it later.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriptionId(pub(super) u64);

/// Callbacks keyed by registration order.
pub struct Registry<C: ?Sized> {
    entries: Mutex<BTreeMap<SubscriptionId, Arc<C>>>,
}

impl<C: ?Sized> Default for Registry<C> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<C: ?Sized> Registry<C> {
    pub fn insert(&self, id: SubscriptionId, callback: Arc<C>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// The callbacks in registration order.
    ///
    /// The lock is released on return, so the callbacks can be
    /// invoked while others get registered or removed.
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
