//! Bounded free-lists of reusable pipeline objects.
//!
//! A [`Pool`] is built with a fixed number of pre-constructed objects and never grows.
//! Objects leave the pool as [`Pooled`] handles, which cannot be cloned: whoever holds the
//! handle owns the object. The handle goes back to its pool on [`Pooled::put`] or when it
//! is dropped, so every object that is taken out comes back exactly once.
//!
//! ```
//! use pooled_bgzf::pool::{Pool, Reusable};
//!
//! #[derive(Default)]
//! struct Scratch(Vec<u8>);
//!
//! impl Reusable for Scratch {
//!     fn reset(&mut self) {
//!         self.0.clear();
//!     }
//! }
//!
//! let pool = Pool::new("scratch", 2, Scratch::default);
//! let mut a = pool.get();
//! a.0.push(1);
//! let _b = pool.get();
//! assert!(pool.get_if().is_none());
//! a.put();
//! assert!(pool.get_if().unwrap().0.is_empty());
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};

/// Objects that are cleared before being handed out again.
pub trait Reusable {
    /// Return the object to its freshly constructed state.
    fn reset(&mut self);
}

/// Called after an object has been returned to its pool.
type ReturnHook = Box<dyn Fn() + Send + Sync>;

struct PoolInner<T> {
    name: &'static str,
    capacity: usize,
    free: Mutex<Vec<T>>,
    available: Condvar,
    on_return: OnceLock<ReturnHook>,
}

/// A fixed-capacity free-list with blocking and non-blocking acquisition.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl<T: Reusable> Pool<T> {
    /// Create a pool holding `capacity` objects built by `factory`.
    pub fn new(name: &'static str, capacity: usize, mut factory: impl FnMut() -> T) -> Self {
        Self::from_items(name, (0..capacity).map(|_| factory()).collect())
    }

    /// Create a pool holding exactly `items`.
    pub fn from_items(name: &'static str, items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity: items.len(),
                free: Mutex::new(items),
                available: Condvar::new(),
                on_return: OnceLock::new(),
            }),
        }
    }

    /// Take an object, waiting until one is returned if the pool is empty.
    pub fn get(&self) -> Pooled<T> {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(item) = free.pop() {
                return Pooled { item: Some(item), pool: Arc::clone(&self.inner) };
            }
            log::trace!("Pool '{}' exhausted, waiting for a returned object", self.inner.name);
            self.inner.available.wait(&mut free);
        }
    }

    /// Take an object if one is free, without waiting.
    pub fn get_if(&self) -> Option<Pooled<T>> {
        self.inner
            .free
            .lock()
            .pop()
            .map(|item| Pooled { item: Some(item), pool: Arc::clone(&self.inner) })
    }

    /// Return an object to this pool.
    ///
    /// Equivalent to [`Pooled::put`]; the handle must have been taken from this pool.
    pub fn put(&self, pooled: Pooled<T>) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &pooled.pool),
            "object returned to pool '{}' but was taken from pool '{}'",
            self.inner.name,
            pooled.pool.name
        );
        pooled.put();
    }
}

impl<T> Pool<T> {
    /// Run `hook` every time an object comes back, after it is free to be taken again.
    ///
    /// Lets a producer that found the pool empty be rescheduled instead of polling. A pool
    /// has at most one hook; later calls are ignored.
    pub fn set_return_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.inner.on_return.set(Box::new(hook)).is_err() {
            log::warn!("Pool '{}' already has a return hook", self.inner.name);
        }
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Number of objects owned by the pool, free or checked out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of objects currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of objects currently checked out.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.inner.capacity - self.available()
    }
}

/// Exclusive ownership of one object borrowed from a [`Pool`].
pub struct Pooled<T: Reusable> {
    item: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Reusable> Pooled<T> {
    /// Reset the object and give it back to its pool, waking one waiter.
    pub fn put(self) {
        drop(self);
    }

    fn release(&mut self) {
        if let Some(mut item) = self.item.take() {
            item.reset();
            let mut free = self.pool.free.lock();
            debug_assert!(
                free.len() < self.pool.capacity,
                "pool '{}' received more objects than its capacity",
                self.pool.name
            );
            free.push(item);
            drop(free);
            self.pool.available.notify_one();
            if let Some(hook) = self.pool.on_return.get() {
                hook();
            }
        }
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The item is only taken by `release`, which consumes the handle.
        self.item.as_ref().unwrap_or_else(|| unreachable!("pooled object already returned"))
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("pooled object already returned"))
    }
}

impl<T: Reusable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
