//! Lightweight handle types for shared ownership and weak back-references.
//!
//! - [Handle<T>] owns a strong reference using [Arc]. An address space keeps the only
//!   long-lived [Handle] to its page table; any other instance comes from
//!   [HandleRef::get_handle] and should be temporary.
//! - [HandleRef<T>] stores a [Weak] reference. Device frame records use it to reach the page
//!   table of the space owning a frame without keeping that space alive.
//!
//! Upgrading fails once the owner dropped the target. **Consumers must handle the [None] case.**
use core::ops::Deref;
use std::sync::{Arc, Weak};

/// Strong owning handle backed by [Arc<T>].
#[derive(Debug)]
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Handle<T> {
    /// Create a non-owning [HandleRef<T>] to the same object.
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak (non-owning) handle backed by [Weak<T>].
#[derive(Debug)]
pub struct HandleRef<T> {
    inner: Weak<T>,
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> HandleRef<T> {
    /// A reference that never upgrades.
    pub const fn dangling() -> HandleRef<T> {
        HandleRef { inner: Weak::new() }
    }

    /// Attempt to upgrade into a strong [Handle<T>].
    ///
    /// Returns `None` if the target has been dropped.
    pub fn get_handle(&self) -> Option<Handle<T>> {
        Weak::upgrade(&self.inner).map(|arc| Handle { inner: arc })
    }

    /// Whether this reference points at the object behind `handle`.
    pub fn refers_to(&self, handle: &Handle<T>) -> bool {
        core::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&handle.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_upgrades_while_owner_lives() {
        let handle = Handle::from(5usize);
        let weak = handle.create_ref();
        assert!(weak.refers_to(&handle));
        assert_eq!(weak.get_handle().map(|h| *h), Some(5));
        drop(handle);
        assert!(weak.get_handle().is_none());
    }

    #[test]
    fn test_dangling_never_upgrades() {
        let weak: HandleRef<u8> = HandleRef::dangling();
        assert!(weak.get_handle().is_none());
        assert!(!weak.refers_to(&Handle::from(0u8)));
    }
}
