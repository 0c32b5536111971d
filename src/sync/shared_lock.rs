use std::ops::{Deref, DerefMut};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A reader/writer lock: many readers may hold the lock concurrently, or
/// exactly one writer may hold it exclusively.
///
/// Used by the [`FiberMessageCenter`](crate::fiber::FiberMessageCenter)'s
/// fiber-id table (senders take the read side, the scheduler takes the
/// write side to register/unregister fibers) and by the
/// [`Observable`](crate::event::Observable)'s observer/tap maps.
pub struct SharedLock<T> {
    inner: RwLock<T>,
}

impl<T> SharedLock<T> {
    pub fn new(data: T) -> Self {
        Self { inner: RwLock::new(data) }
    }

    /// Acquires the lock for reading. Blocks only while a writer holds it.
    pub fn read(&self) -> SharedLockReadGuard<'_, T> {
        SharedLockReadGuard { guard: self.inner.read().unwrap_or_else(|e| e.into_inner()) }
    }

    /// Acquires the lock for writing. Blocks while any reader or writer
    /// holds it.
    pub fn write(&self) -> SharedLockWriteGuard<'_, T> {
        SharedLockWriteGuard { guard: self.inner.write().unwrap_or_else(|e| e.into_inner()) }
    }
}

impl<T: Default> Default for SharedLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SharedLockReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

impl<'a, T> Deref for SharedLockReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct SharedLockWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<'a, T> Deref for SharedLockWriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for SharedLockWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
