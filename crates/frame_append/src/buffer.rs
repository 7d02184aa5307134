//! # Primary Buffer
//!
//! Owned, zero-initialised, element-aligned heap storage.
//!
//! ## Safety Note
//!
//! This module manages a raw allocation so that worker threads can write
//! distinct slots through a shared reference. Every unsafe block below states
//! the invariant it relies on.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::element::Element;

/// Contiguous storage for `capacity` elements.
///
/// Fresh memory is always zeroed, which is a valid `T` for every
/// [`Element`]. The buffer does not track how many slots are populated;
/// the owning container does.
pub(crate) struct RawBuffer<T: Element> {
    /// Start of the allocation (dangling when `capacity == 0`).
    ptr: NonNull<T>,
    /// Number of elements the allocation holds.
    capacity: usize,
}

impl<T: Element> RawBuffer<T> {
    /// An empty buffer that owns no memory.
    #[inline]
    pub(crate) const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
        }
    }

    /// Allocates a zeroed buffer for `capacity` elements.
    ///
    /// Aborts through [`alloc::handle_alloc_error`] when the allocator fails.
    pub(crate) fn zeroed(capacity: usize) -> Self {
        if capacity == 0 {
            return Self::empty();
        }

        let layout = Self::layout(capacity);
        // SAFETY: `layout` has a non-zero size (capacity > 0, and zero-sized
        // elements are rejected by the container).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr =
            NonNull::new(raw.cast::<T>()).unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self { ptr, capacity }
    }

    fn layout(capacity: usize) -> Layout {
        Layout::array::<T>(capacity).unwrap_or_else(|_| panic!("capacity overflow"))
    }

    /// Number of elements this buffer can hold.
    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the allocation in bytes.
    #[inline]
    pub(crate) const fn byte_len(&self) -> usize {
        self.capacity * std::mem::size_of::<T>()
    }

    /// Start of the storage.
    #[inline]
    pub(crate) const fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Storage of slot `index`.
    ///
    /// Deriving the pointer is always fine; dereferencing it is only sound
    /// for the caller that owns the slot.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> NonNull<T> {
        debug_assert!(index < self.capacity, "slot {index} out of bounds ({})", self.capacity);
        // SAFETY: `index < capacity`, so the offset stays inside the allocation.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index)) }
    }

    /// The first `len` slots as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    pub(crate) fn slice(&mut self, len: usize) -> &[T] {
        assert!(len <= self.capacity, "length {len} exceeds capacity {}", self.capacity);
        // SAFETY: `&mut self` rules out concurrent writers, the range is in
        // bounds, and every slot holds a valid (at worst zeroed) element.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), len) }
    }

    /// The first `len` slots as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    pub(crate) fn slice_mut(&mut self, len: usize) -> &mut [T] {
        assert!(len <= self.capacity, "length {len} exceeds capacity {}", self.capacity);
        // SAFETY: as for `slice`, and `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), len) }
    }

    /// Copies `count` elements from `src` into this buffer starting at `offset`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `count` reads and must not overlap this buffer.
    /// No other thread may access either region during the copy.
    ///
    /// # Panics
    ///
    /// Panics if `offset + count` exceeds the capacity.
    pub(crate) unsafe fn copy_in(&mut self, offset: usize, src: *const T, count: usize) {
        let end = offset.checked_add(count).unwrap_or_else(|| panic!("capacity overflow"));
        assert!(
            end <= self.capacity,
            "copy of {count} at {offset} exceeds capacity {}",
            self.capacity
        );
        if count == 0 {
            return;
        }
        // SAFETY: destination range checked above; source validity and
        // non-overlap are the caller's contract.
        unsafe { ptr::copy_nonoverlapping(src, self.ptr.as_ptr().add(offset), count) };
    }

    /// Replaces the allocation with a zeroed one of `new_capacity` elements,
    /// keeping the first `min(old, new)` elements.
    pub(crate) fn reallocate(&mut self, new_capacity: usize) {
        let mut fresh = Self::zeroed(new_capacity);
        let keep = self.capacity.min(new_capacity);
        // SAFETY: `self` and `fresh` are distinct allocations, `&mut self`
        // excludes other access, and `keep` fits in both.
        unsafe { fresh.copy_in(0, self.ptr.as_ptr(), keep) };
        *self = fresh;
    }
}

impl<T: Element> Drop for RawBuffer<T> {
    fn drop(&mut self) {
        if self.capacity != 0 {
            // SAFETY: a non-zero capacity means `ptr` came from `alloc_zeroed`
            // with exactly this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), Self::layout(self.capacity)) };
        }
    }
}
