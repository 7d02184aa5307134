//! # Overflow Pages
//!
//! Fixed-size blocks that absorb pushes once the primary buffer is full.
//!
//! ```text
//! ┌──────────────────────── page_bytes (4 KiB default) ────────────────────────┐
//! │ Page header (next, size, capacity, ...) │ pad │ T │ T │ T │ ... │ T │ slack │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!                                                 ▲
//!                                                 data
//! ```
//!
//! ## Safety Note
//!
//! Pages are raw allocations linked through atomic pointers. A page is fully
//! initialised before it is published with a release CAS, and is only freed
//! by the single-writer operations that hold `&mut` on the owning buffer.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::element::Element;
use crate::slot::try_claim;

/// Default page block size in bytes.
pub const DEFAULT_PAGE_BYTES: usize = 4096;

/// Header stored at the front of every page block.
#[repr(C)]
pub(crate) struct Page<T: Element> {
    /// Next page in the list. Written once, from null, by CAS.
    next: AtomicPtr<Page<T>>,
    /// Claimed slots. Never advanced past `capacity`.
    size: AtomicUsize,
    /// Element slots that fit after the header.
    capacity: usize,
    /// Total size of the block (header included).
    block_bytes: usize,
    /// First element slot, inside the same block.
    data: NonNull<T>,
}

impl<T: Element> Page<T> {
    /// Byte offset of the element storage from the start of the block.
    const DATA_OFFSET: usize = {
        let header = size_of::<Page<T>>();
        let align = align_of::<T>();
        (header + align - 1) & !(align - 1)
    };

    /// Alignment of the whole block.
    const BLOCK_ALIGN: usize = if align_of::<T>() > align_of::<Page<T>>() {
        align_of::<T>()
    } else {
        align_of::<Page<T>>()
    };

    /// Block size actually used for a requested `page_bytes`.
    ///
    /// A block always fits at least one element, growing past `page_bytes`
    /// when the element is too large for the default block.
    pub(crate) const fn block_bytes_for(page_bytes: usize) -> usize {
        let minimum = Self::DATA_OFFSET + size_of::<T>();
        if page_bytes < minimum {
            minimum
        } else {
            page_bytes
        }
    }

    /// Element capacity of a page built for `page_bytes`.
    pub(crate) const fn capacity_for(page_bytes: usize) -> usize {
        (Self::block_bytes_for(page_bytes) - Self::DATA_OFFSET) / size_of::<T>()
    }

    fn layout(block_bytes: usize) -> Layout {
        Layout::from_size_align(block_bytes, Self::BLOCK_ALIGN)
            .unwrap_or_else(|_| panic!("invalid page layout ({block_bytes} bytes)"))
    }

    /// Allocates and initialises an unlinked, empty page.
    ///
    /// Element storage is zeroed. Aborts through [`alloc::handle_alloc_error`]
    /// when the allocator fails.
    pub(crate) fn allocate(page_bytes: usize) -> NonNull<Self> {
        let block_bytes = Self::block_bytes_for(page_bytes);
        let layout = Self::layout(block_bytes);

        // SAFETY: `block_bytes` is at least one header plus one element.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(block) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };

        // SAFETY: `DATA_OFFSET < block_bytes`, so the data pointer stays in
        // the block, and `BLOCK_ALIGN` covers the alignment of `T`.
        let data = unsafe { NonNull::new_unchecked(raw.add(Self::DATA_OFFSET).cast::<T>()) };
        let page = block.cast::<Self>();

        // SAFETY: the block is freshly allocated, large enough and aligned for
        // the header; nothing else can observe it yet.
        unsafe {
            ptr::write(
                page.as_ptr(),
                Self {
                    next: AtomicPtr::new(ptr::null_mut()),
                    size: AtomicUsize::new(0),
                    capacity: Self::capacity_for(page_bytes),
                    block_bytes,
                    data,
                },
            );
        }

        page
    }

    /// Frees a page block.
    ///
    /// # Safety
    ///
    /// `page` must come from [`Page::allocate`], must not be freed twice, and
    /// no other thread may hold a reference into it.
    pub(crate) unsafe fn free(page: NonNull<Self>) {
        // SAFETY: the header is initialised for every allocated page.
        let block_bytes = unsafe { page.as_ref().block_bytes };
        // SAFETY: same block and layout as in `allocate`.
        unsafe { alloc::dealloc(page.as_ptr().cast::<u8>(), Self::layout(block_bytes)) };
    }

    /// Element slots in this page.
    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the whole block in bytes.
    #[inline]
    pub(crate) const fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Claimed slots (a snapshot under concurrency).
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Fast-path hint: `true` if the page looked non-full.
    ///
    /// The authoritative check is the CAS inside [`Page::try_claim`].
    #[inline]
    pub(crate) fn has_room(&self) -> bool {
        self.size.load(Ordering::Relaxed) < self.capacity
    }

    /// Claims one slot, returning its page-local index and storage.
    #[inline]
    pub(crate) fn try_claim(&self) -> Option<(usize, NonNull<T>)> {
        try_claim(&self.size, self.capacity).map(|local| (local, self.slot(local)))
    }

    /// Storage of page-local slot `local`.
    #[inline]
    pub(crate) fn slot(&self, local: usize) -> NonNull<T> {
        debug_assert!(local < self.capacity, "page slot {local} out of bounds ({})", self.capacity);
        // SAFETY: `local < capacity`, so the slot lies inside the block.
        unsafe { NonNull::new_unchecked(self.data.as_ptr().add(local)) }
    }

    /// Start of the element storage.
    #[inline]
    pub(crate) const fn data(&self) -> *const T {
        self.data.as_ptr()
    }

    /// The link slot that follows this page.
    #[inline]
    pub(crate) const fn next_link(&self) -> &AtomicPtr<Page<T>> {
        &self.next
    }
}

/// Iterates the pages reachable from `head`, in link order.
pub(crate) struct PageIter<'a, T: Element> {
    cursor: Option<&'a Page<T>>,
}

impl<'a, T: Element> PageIter<'a, T> {
    /// Starts at the page stored in `head`.
    #[inline]
    pub(crate) fn new(head: &'a AtomicPtr<Page<T>>) -> Self {
        Self {
            cursor: load_link(head),
        }
    }
}

impl<'a, T: Element> Iterator for PageIter<'a, T> {
    type Item = &'a Page<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let page = self.cursor?;
        self.cursor = load_link(page.next_link());
        Some(page)
    }
}

/// Follows a link slot.
///
/// The acquire load pairs with the release CAS in [`try_link`], so the
/// returned page is fully initialised.
#[inline]
pub(crate) fn load_link<'a, T: Element>(link: &'a AtomicPtr<Page<T>>) -> Option<&'a Page<T>> {
    let raw = link.load(Ordering::Acquire);
    // SAFETY: non-null links always point at initialised pages that live
    // until the owning buffer frees them under `&mut`.
    unsafe { raw.as_ref() }
}

/// Publishes `page` into `link` if the link is still empty.
///
/// Returns `Err(page)` when another thread linked a page there first; the
/// caller still owns `page` in that case.
#[inline]
pub(crate) fn try_link<T: Element>(
    link: &AtomicPtr<Page<T>>,
    page: NonNull<Page<T>>,
) -> Result<(), NonNull<Page<T>>> {
    link.compare_exchange(ptr::null_mut(), page.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| page)
}

/// Unlinks and frees every page reachable from `head`, leaving it null.
///
/// Takes `&mut` so no pusher or reader can be walking the list.
pub(crate) fn free_all<T: Element>(head: &mut AtomicPtr<Page<T>>) -> usize {
    let mut freed = 0;
    let mut raw = std::mem::replace(head.get_mut(), ptr::null_mut());

    while let Some(page) = NonNull::new(raw) {
        // SAFETY: the list is exclusively owned here; read the link before
        // the block goes away.
        unsafe {
            raw = (*page.as_ptr()).next.load(Ordering::Relaxed);
            Page::free(page);
        }
        freed += 1;
    }

    freed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_capacity_fills_block() {
        let capacity = Page::<u32>::capacity_for(DEFAULT_PAGE_BYTES);
        let used = Page::<u32>::DATA_OFFSET + capacity * size_of::<u32>();

        assert!(capacity > 0);
        assert!(used <= DEFAULT_PAGE_BYTES);
        assert!(DEFAULT_PAGE_BYTES - used < size_of::<u32>());
    }

    #[test]
    fn test_oversized_element_gets_one_slot() {
        assert_eq!(Page::<[u64; 1024]>::capacity_for(DEFAULT_PAGE_BYTES), 1);
        assert!(Page::<[u64; 1024]>::block_bytes_for(DEFAULT_PAGE_BYTES) > DEFAULT_PAGE_BYTES);
    }

    #[test]
    fn test_page_data_is_aligned() {
        let page = Page::<u128>::allocate(DEFAULT_PAGE_BYTES);
        // SAFETY: freshly allocated and not shared.
        let header = unsafe { page.as_ref() };
        assert_eq!(header.data() as usize % align_of::<u128>(), 0);
        assert_eq!(header.block_bytes(), DEFAULT_PAGE_BYTES);
        // SAFETY: allocated above, freed once.
        unsafe { Page::free(page) };
    }

    #[test]
    fn test_page_claims_until_full() {
        let page = Page::<u64>::allocate(256);
        // SAFETY: freshly allocated and not shared.
        let header = unsafe { page.as_ref() };
        let capacity = header.capacity();

        for expected in 0..capacity {
            let (local, slot) = header.try_claim().unwrap();
            assert_eq!(local, expected);
            assert_eq!(slot, header.slot(expected));
        }
        assert!(!header.has_room());
        assert!(header.try_claim().is_none());
        assert_eq!(header.len(), capacity);

        // SAFETY: allocated above, freed once.
        unsafe { Page::free(page) };
    }

    #[test]
    fn test_link_and_free_list() {
        let mut head: AtomicPtr<Page<u32>> = AtomicPtr::new(ptr::null_mut());

        let first = Page::allocate(DEFAULT_PAGE_BYTES);
        assert!(try_link(&head, first).is_ok());

        // The head is taken; a second page must go after the first.
        let second = Page::allocate(DEFAULT_PAGE_BYTES);
        let second = try_link(&head, second).unwrap_err();
        let tail = PageIter::new(&head).last().unwrap();
        assert!(try_link(tail.next_link(), second).is_ok());

        assert_eq!(PageIter::new(&head).count(), 2);
        assert_eq!(free_all(&mut head), 2);
        assert!(PageIter::new(&head).next().is_none());
    }
}
