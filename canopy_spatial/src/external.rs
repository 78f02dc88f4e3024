// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Non-owning views of caller-owned buffers.

#![allow(
    unsafe_code,
    reason = "A mesh aliases memory it does not own; the contract is stated on the constructor."
)]

use std::fmt::Debug;
use std::ptr::NonNull;

/// A borrowed slice whose lifetime the caller guarantees out of band.
///
/// A mesh keeps these views for its whole life and re-reads them on every
/// refit, so the caller may update the contents in place between calls.
pub struct ExternalSlice<T> {
    ptr: NonNull<T>,
    len: usize,
}

impl<T> Clone for ExternalSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExternalSlice<T> {}

// SAFETY: the view is only read, and `from_raw_parts` requires the memory to
// stay valid for as long as any copy of the view is used.
unsafe impl<T: Sync> Send for ExternalSlice<T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for ExternalSlice<T> {}

impl<T> ExternalSlice<T> {
    /// Wrap `len` elements starting at `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be aligned and point to `len` initialized elements that stay
    /// valid, and are not resized or freed, until every structure holding this
    /// view has been destroyed. Writes to the elements are permitted only
    /// while no operation reading the view is running.
    pub unsafe fn from_raw_parts(ptr: *const T, len: usize) -> Option<Self> {
        NonNull::new(ptr.cast_mut()).map(|ptr| Self { ptr, len })
    }

    /// Wrap a slice that lives for the rest of the program.
    pub fn from_static(slice: &'static [T]) -> Self {
        Self {
            ptr: NonNull::from(slice).cast(),
            len: slice.len(),
        }
    }

    /// The viewed elements.
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: upheld by the `from_raw_parts` contract or a `'static` borrow.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element `i`, if in range.
    pub fn get(&self, i: usize) -> Option<&T> {
        self.as_slice().get(i)
    }
}

impl<T> Debug for ExternalSlice<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExternalSlice")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
