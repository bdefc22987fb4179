//! A generic, thread-safe map of objects with auto-incrementing ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Indexed collection shared between sessions and the hub.
///
/// Ids are allocated monotonically starting at 1 and never reused within a
/// process lifetime, even when the caller supplies its own key.
#[derive(Debug)]
pub struct SharedCollection<T> {
    inner: Mutex<Inner<T>>,
    len: AtomicUsize,
}

#[derive(Debug)]
struct Inner<T> {
    objects: HashMap<u64, T>,
    next_id: u64,
}

impl<T: Clone> SharedCollection<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: HashMap::with_capacity(capacity),
                next_id: 1,
            }),
            len: AtomicUsize::new(0),
        }
    }

    /// Insert under a fresh id and return it.
    pub fn add(&self, obj: T) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.objects.insert(id, obj).is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    /// Insert under a caller-supplied key (used to bind a player to its
    /// owning client's id). The id counter still advances, so fresh ids
    /// stay unique regardless.
    pub fn add_with_id(&self, obj: T, id: u64) -> u64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        if inner.objects.insert(id, obj).is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    pub fn remove(&self, id: u64) {
        let mut inner = self.lock();
        if inner.objects.remove(&id).is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.lock().objects.get(&id).cloned()
    }

    /// Approximate number of objects, read without taking the map lock.
    /// Diagnostics only.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call the callback for each object.
    ///
    /// Iterates a point-in-time snapshot taken under the lock, so the
    /// callback may call back into this collection without deadlocking.
    /// Mutations made from inside the callback become visible on the next
    /// iteration, not the current one. Iteration order is unspecified.
    pub fn for_each<F: FnMut(u64, &T)>(&self, mut f: F) {
        let snapshot: Vec<(u64, T)> = {
            let inner = self.lock();
            inner.objects.iter().map(|(id, obj)| (*id, obj.clone())).collect()
        };
        for (id, obj) in &snapshot {
            f(*id, obj);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for SharedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
