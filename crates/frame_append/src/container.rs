//! # Lock-Free Append Buffer
//!
//! Multi-producer hand-off storage for one frame of job output.
//!
//! ## Safety Note
//!
//! Producers write distinct slots through `&self`; every growth operation
//! takes `&mut self`. The borrow checker therefore enforces the "no push
//! during coalesce/resize/reserve/clear" contract, and the unsafe blocks
//! below only rely on slot uniqueness from the claim CAS.

#![allow(unsafe_code)]

use std::fmt;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::buffer::RawBuffer;
use crate::config::AppendConfig;
use crate::element::Element;
use crate::error::ConfigResult;
use crate::page::{self, load_link, try_link, Page, PageIter, DEFAULT_PAGE_BYTES};
use crate::sizer::MemorySizer;
use crate::slot::try_claim;
use crate::view::AppendView;

/// Lock-free, multi-producer, append-only container.
///
/// Storage has two tiers:
/// - a **primary buffer**: one contiguous allocation, filled by CAS claims
/// - an **overflow page list**: fixed-size pages linked on demand once the
///   primary buffer is full, each filled by the same CAS claim
///
/// Every push gets a unique logical index in `0..len()`, no matter which tier
/// served it. [`coalesce`](Self::coalesce) folds the pages back into a
/// larger primary buffer so the next frame pushes without overflow.
///
/// ```text
///   logical index:  0 1 2 3 │ 4 5 6 7 8 9 │ 10 11 12 13 14 15 │ ...
///                  primary  │   page 0    │      page 1       │
/// ```
///
/// # Thread Safety
///
/// - `push`, `push_new`, `push_with`, `len`, `capacity`: any thread, no locks
/// - `view`, `coalesce`, `resize`, `reserve`, `clear`: `&mut self` (exclusive)
///
/// # Example
///
/// ```rust,ignore
/// let mut items: AppendBuffer<DrawItem> = AppendBuffer::with_capacity(1024);
///
/// // Producer stage: jobs push concurrently.
/// std::thread::scope(|s| {
///     for job in jobs {
///         let items = &items;
///         s.spawn(move || job.emit(|item| { items.push(item); }));
///     }
/// });
///
/// // Consumer stage: producers are done.
/// let contiguous = items.as_slice();
/// ```
pub struct AppendBuffer<T: Element> {
    /// Contiguous storage. Only replaced under `&mut self`.
    primary: RawBuffer<T>,
    /// Claimed elements across the primary buffer and all pages.
    len: AtomicUsize,
    /// Head of the overflow page list (null when empty).
    pages: AtomicPtr<Page<T>>,
    /// Block size for new overflow pages.
    page_bytes: usize,
}

// SAFETY: the buffer owns its storage outright; elements are `Send + Sync`
// plain data and shared mutation goes through atomics or uniquely claimed
// slots.
unsafe impl<T: Element> Send for AppendBuffer<T> {}
// SAFETY: see above; `&self` methods only touch claimed slots and atomics.
unsafe impl<T: Element> Sync for AppendBuffer<T> {}

impl<T: Element> AppendBuffer<T> {
    /// Creates an empty buffer. The first push allocates an overflow page.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a buffer whose primary storage holds `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or the allocation size overflows.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(capacity, DEFAULT_PAGE_BYTES)
    }

    /// Creates a buffer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error if `config` is out of bounds.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn from_config(config: &AppendConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(config.initial_capacity, config.page_bytes))
    }

    fn build(capacity: usize, page_bytes: usize) -> Self {
        assert!(size_of::<T>() != 0, "zero-sized elements are not supported");

        Self {
            primary: RawBuffer::zeroed(capacity),
            len: AtomicUsize::new(0),
            pages: AtomicPtr::new(ptr::null_mut()),
            page_bytes,
        }
    }

    /// Number of claimed elements.
    ///
    /// Under concurrent pushes this is a snapshot. It only decreases through
    /// [`clear`](Self::clear) or a shrinking [`resize`](Self::resize).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns `true` if nothing has been claimed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Primary capacity plus the capacity of every overflow page.
    ///
    /// Advisory while producers are running: pages may be linked during the
    /// walk.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.primary.capacity() + self.pages().map(Page::capacity).sum::<usize>()
    }

    /// Elements the primary buffer holds.
    #[inline]
    #[must_use]
    pub const fn primary_capacity(&self) -> usize {
        self.primary.capacity()
    }

    /// Number of overflow pages currently linked.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages().count()
    }

    /// Requested block size of overflow pages.
    #[inline]
    #[must_use]
    pub const fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    /// Appends `value` and returns its logical index.
    ///
    /// Lock-free; may allocate an overflow page.
    #[inline]
    pub fn push(&self, value: T) -> usize {
        let (index, slot) = self.claim();
        // SAFETY: the claim handed this slot to us alone, and it stays
        // allocated until a `&mut self` operation.
        unsafe { slot.as_ptr().write(value) };
        index
    }

    /// Claims a new slot and initialises it in place through `init`.
    ///
    /// The slot passed to `init` holds zeroed or stale bytes, both of which
    /// are valid values of `T`.
    #[inline]
    pub fn push_with<F>(&self, init: F) -> usize
    where
        F: FnOnce(&mut T),
    {
        let (index, slot) = self.claim();
        // SAFETY: as in `push`; the borrow ends when `init` returns.
        init(unsafe { &mut *slot.as_ptr() });
        index
    }

    /// Claims a new slot and returns its logical index and storage.
    ///
    /// The reference stays valid, and keeps pointing at the element with that
    /// index, until the next `&mut self` operation.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub fn push_new(&self) -> (usize, &mut T) {
        let (index, slot) = self.claim();
        // SAFETY: the slot is unique to this caller, lives as long as `&self`,
        // and safe readers need `&mut self` (see `view`).
        (index, unsafe { &mut *slot.as_ptr() })
    }

    /// Claims one slot: primary buffer first, overflow pages after.
    #[inline]
    fn claim(&self) -> (usize, NonNull<T>) {
        match try_claim(&self.len, self.primary.capacity()) {
            Some(index) => (index, self.primary.slot(index)),
            None => self.claim_overflow(),
        }
    }

    /// First-fit claim across the page list, linking a new page when every
    /// page is full.
    #[cold]
    fn claim_overflow(&self) -> (usize, NonNull<T>) {
        loop {
            let mut base = self.primary.capacity();
            let mut link = &self.pages;

            while let Some(page) = load_link(link) {
                if page.has_room() {
                    if let Some((local, slot)) = page.try_claim() {
                        self.len.fetch_add(1, Ordering::AcqRel);
                        return (base + local, slot);
                    }
                }
                base += page.capacity();
                link = page.next_link();
            }

            // `link` is the empty slot after the tail we observed.
            let fresh = Page::allocate(self.page_bytes);
            match try_link(link, fresh) {
                Ok(()) => trace!(base, "linked overflow page"),
                Err(lost) => {
                    // Another producer linked a page first; use theirs.
                    // SAFETY: `lost` was never published.
                    unsafe { Page::free(lost) };
                    trace!(base, "lost page link race");
                }
            }
        }
    }

    /// Storage of logical `index`, if it lies within the current capacity.
    pub(crate) fn resolve(&self, index: usize) -> Option<NonNull<T>> {
        if index < self.primary.capacity() {
            return Some(self.primary.slot(index));
        }

        let mut base = self.primary.capacity();
        for page in self.pages() {
            if index < base + page.capacity() {
                return Some(page.slot(index - base));
            }
            base += page.capacity();
        }
        None
    }

    /// Whether logical `index` has been handed out by a claim.
    ///
    /// Checked against the counter of the tier that owns the slot, not
    /// `len()`, which an overflow claim bumps only after taking its index.
    fn is_claimed(&self, index: usize) -> bool {
        if index < self.primary.capacity() {
            return index < self.len();
        }

        let mut base = self.primary.capacity();
        for page in self.pages() {
            if index < base + page.capacity() {
                return index - base < page.len();
            }
            base += page.capacity();
        }
        false
    }

    /// Reads element `index` while producers may still be running.
    ///
    /// # Safety
    ///
    /// Element `index` must be fully written, its writer must have
    /// synchronized with this thread (e.g. a join or a release/acquire
    /// handshake), and nobody may write it while the reference lives.
    ///
    /// # Panics
    ///
    /// Panics if `index` lies beyond every allocated slot.
    #[must_use]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(self.is_claimed(index), "index {index} was never claimed");
        let slot = self
            .resolve(index)
            .unwrap_or_else(|| panic!("index {index} beyond capacity {}", self.capacity()));
        // SAFETY: caller guarantees the slot is written and not being written.
        unsafe { &*slot.as_ptr() }
    }

    /// Mutable access to a claimed element.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len() {
            return None;
        }
        // SAFETY: `&mut self` excludes every other access to the storage.
        self.resolve(index).map(|slot| unsafe { &mut *slot.as_ptr() })
    }

    /// Shared read view of the claimed elements, without coalescing.
    ///
    /// Taking `&mut self` proves every producer is done; the view itself is
    /// `Copy` and can be handed to many reader threads.
    #[must_use]
    pub fn view(&mut self) -> AppendView<'_, T> {
        let len = self.len();
        AppendView::new(self, len)
    }

    /// Coalesces, then returns all claimed elements as one slice.
    #[must_use]
    pub fn as_slice(&mut self) -> &[T] {
        self.coalesce();
        let len = self.len();
        self.primary.slice(len)
    }

    /// Coalesces, then returns all claimed elements as one mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.coalesce();
        let len = self.len();
        self.primary.slice_mut(len)
    }

    /// Folds every overflow page into a new, larger primary buffer.
    ///
    /// The new primary capacity is the old one plus every page's capacity;
    /// page contents are copied in link order, so every logical index keeps
    /// its element. No-op when no page is linked.
    pub fn coalesce(&mut self) {
        if self.pages.get_mut().is_null() {
            return;
        }

        let len_before = self.len();
        let old_capacity = self.primary.capacity();
        let (page_count, page_capacity, page_claimed) = self
            .pages()
            .fold((0usize, 0usize, 0usize), |(n, cap, claimed), page| {
                (n + 1, cap + page.capacity(), claimed + page.len())
            });
        let new_capacity = old_capacity
            .checked_add(page_capacity)
            .unwrap_or_else(|| panic!("capacity overflow"));

        let mut merged = RawBuffer::zeroed(new_capacity);
        // SAFETY: `merged` is a fresh allocation; the old buffer and the pages
        // are distinct blocks, fully initialised, and `&mut self` excludes
        // every other access.
        unsafe { merged.copy_in(0, self.primary.as_ptr(), old_capacity) };
        let mut offset = old_capacity;
        for page in self.pages() {
            // SAFETY: as above.
            unsafe { merged.copy_in(offset, page.data(), page.capacity()) };
            offset += page.capacity();
        }

        self.primary = merged;
        page::free_all(&mut self.pages);

        debug_assert_eq!(self.len(), len_before, "coalesce changed the element count");
        debug!(
            pages = page_count,
            page_elements = page_claimed,
            old_capacity,
            new_capacity,
            "coalesced overflow pages"
        );
    }

    /// Ensures the primary buffer holds at least `capacity` elements.
    ///
    /// Coalesces first. Existing elements are kept; new slots are zeroed.
    /// The length is unchanged.
    pub fn reserve(&mut self, capacity: usize) {
        self.coalesce();
        if capacity > self.primary.capacity() {
            trace!(from = self.primary.capacity(), to = capacity, "reallocating primary buffer");
            self.primary.reallocate(capacity);
        }
    }

    /// Sets the length to `len`, growing the primary buffer if needed.
    ///
    /// Growing zero-fills slots beyond the old capacity. Shrinking frees
    /// nothing; slots past the new length keep their bytes and are handed
    /// out again by later pushes.
    pub fn resize(&mut self, len: usize) {
        self.reserve(len);
        *self.len.get_mut() = len;
    }

    /// Frees the primary buffer and every page; length and capacity become 0.
    pub fn clear(&mut self) {
        let pages = page::free_all(&mut self.pages);
        self.primary = RawBuffer::empty();
        *self.len.get_mut() = 0;
        trace!(pages, "cleared append buffer");
    }

    /// Reports the primary buffer and every page block to `sizer`.
    ///
    /// An unallocated primary buffer is not reported.
    pub fn memory_usage<S: MemorySizer + ?Sized>(&self, sizer: &S) {
        if self.primary.byte_len() != 0 {
            sizer.add_object(self.primary.as_ptr().cast::<u8>(), self.primary.byte_len());
        }
        for page in self.pages() {
            sizer.add_object((page as *const Page<T>).cast::<u8>(), page.block_bytes());
        }
    }

    /// Walks the overflow pages in link order.
    #[inline]
    pub(crate) fn pages(&self) -> PageIter<'_, T> {
        PageIter::new(&self.pages)
    }

    /// Start of the primary storage.
    #[inline]
    pub(crate) const fn primary_ptr(&self) -> *const T {
        self.primary.as_ptr()
    }
}

impl<T: Element> Default for AppendBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Drop for AppendBuffer<T> {
    fn drop(&mut self) {
        page::free_all(&mut self.pages);
    }
}

impl<T: Element> fmt::Debug for AppendBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendBuffer")
            .field("len", &self.len())
            .field("primary_capacity", &self.primary_capacity())
            .field("page_count", &self.page_count())
            .field("page_bytes", &self.page_bytes)
            .finish()
    }
}
