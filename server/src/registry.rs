//! Thread-safe handle registry shared by the hub and the world
//!
//! A `Registry` maps an assigned integer handle to an owned value. It backs:
//! - The table of live sessions, owned and mutated by the hub alone
//! - In-memory world object tables (actors, placed objects), mutated by any
//!   state handler on any session's task
//!
//! Handles come from a counter that lives under the registry's own lock and
//! only ever grows, so a handle is never handed out twice while the server runs.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Handle type used for every registry; session tables use it as the `SessionId`.
pub type Handle = u64;

struct Inner<T> {
    entries: HashMap<Handle, T>,
    /// Next handle to hand out; starts at 1 so 0 can mean "no sender"
    next_id: Handle,
}

/// Maps assigned handles to values with snapshot iteration
///
/// None of the operations fail. Absence is reported through `Option` and
/// `bool` results rather than errors.
pub struct Registry<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> Registry<T> {
    /// Creates an empty registry whose first assigned handle is 1
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value under a freshly assigned handle and returns it
    pub fn add(&self, value: T) -> Handle {
        self.insert(value, None)
    }

    /// Stores a value, either under `explicit_id` or under the next counter value
    ///
    /// An explicit id does not consume the counter and is not checked for
    /// collisions. Only the hub's registration path calls this with an id,
    /// after taking that id from [`Registry::reserve_id`]; every other caller
    /// goes through [`Registry::add`].
    pub(crate) fn insert(&self, value: T, explicit_id: Option<Handle>) -> Handle {
        let mut inner = self.write();
        let id = match explicit_id {
            Some(id) => id,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };
        inner.entries.insert(id, value);
        id
    }

    /// Consumes the next handle without storing anything under it yet
    pub(crate) fn reserve_id(&self) -> Handle {
        let mut inner = self.write();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Removes an entry, returning true if something was removed
    pub fn remove(&self, id: Handle) -> bool {
        self.write().entries.remove(&id).is_some()
    }

    /// Removes an entry and hands back its value
    pub fn take(&self, id: Handle) -> Option<T> {
        self.write().entries.remove(&id)
    }

    /// Point lookup returning a clone of the stored value
    pub fn get(&self, id: Handle) -> Option<T> {
        self.read().entries.get(&id).cloned()
    }

    pub fn contains(&self, id: Handle) -> bool {
        self.read().entries.contains_key(&id)
    }

    /// Applies `f` to the stored value in place; false if the handle is unknown
    pub fn modify<F>(&self, id: Handle, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.write().entries.get_mut(&id) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Copies the table under a brief read lock, then runs `f` on each copy
    ///
    /// No lock is held while `f` runs, so callbacks may freely call back into
    /// this or any other registry. Removals racing with an in-flight iteration
    /// may or may not be observed by it.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(Handle, &T),
    {
        for (id, value) in self.snapshot() {
            f(id, &value);
        }
    }

    /// Clones every entry into a vector
    pub fn snapshot(&self) -> Vec<(Handle, T)> {
        self.read()
            .entries
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }

    /// Returns the number of stored entries
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
