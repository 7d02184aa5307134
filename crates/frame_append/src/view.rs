//! # Read View
//!
//! Consumer-side access to a finished frame, straight over the two storage
//! tiers, with no coalesce required.

#![allow(unsafe_code)]

use std::fmt;
use std::ops::Index;
use std::slice;

use crate::container::AppendBuffer;
use crate::element::Element;

/// Shared read access to the first `len` elements of an [`AppendBuffer`].
///
/// Obtained through [`AppendBuffer::view`], which borrows the buffer
/// mutably, so no producer can be writing while a view exists. The view is
/// `Copy` and can be shared across reader threads.
pub struct AppendView<'a, T: Element> {
    buffer: &'a AppendBuffer<T>,
    len: usize,
}

impl<'a, T: Element> AppendView<'a, T> {
    #[inline]
    pub(crate) fn new(buffer: &'a AppendBuffer<T>, len: usize) -> Self {
        Self { buffer, len }
    }

    /// Number of elements visible through the view.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the view holds no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element `index`, resolved through the primary buffer or the page walk.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: the view exists only while the buffer is exclusively
        // borrowed, so nothing writes the slot.
        self.buffer.resolve(index).map(|slot| unsafe { &*slot.as_ptr() })
    }

    /// The elements as contiguous runs: primary buffer first, then each
    /// page in link order. Empty runs are skipped.
    pub fn chunks(&self) -> impl Iterator<Item = &'a [T]> + 'a {
        let buffer = self.buffer;
        let mut remaining = self.len;

        let primary_len = remaining.min(buffer.primary_capacity());
        remaining -= primary_len;
        // SAFETY: `primary_len` slots are in bounds and not being written.
        let primary = unsafe { slice::from_raw_parts(buffer.primary_ptr(), primary_len) };

        let pages = buffer.pages().map(move |page| {
            let take = remaining.min(page.capacity());
            remaining -= take;
            // SAFETY: `take` slots of this page are in bounds and not being
            // written.
            unsafe { slice::from_raw_parts(page.data(), take) }
        });

        std::iter::once(primary)
            .chain(pages)
            .filter(|chunk| !chunk.is_empty())
    }

    /// Iterates the elements in logical index order.
    pub fn iter(&self) -> impl Iterator<Item = &'a T> + 'a {
        self.chunks().flatten()
    }
}

impl<T: Element> Clone for AppendView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Element> Copy for AppendView<'_, T> {}

impl<T: Element> Index<usize> for AppendView<'_, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        self.get(index)
            .unwrap_or_else(|| panic!("index {index} out of bounds (len {})", self.len))
    }
}

impl<T: Element + fmt::Debug> fmt::Debug for AppendView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
