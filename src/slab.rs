//! The slot-allocation engine.
//!
//! A [`Slab`] owns a contiguous virtual range of 4 KiB pages and hands out
//! fixed-size objects from it. Allocation hashes a starting page and
//! sub-bitmap, then claims a slot bit with a single compare-exchange per
//! word; deallocation is pure pointer arithmetic plus a fetch-and. Physical
//! pages are published on demand and drained back to the OS when usage
//! falls, coordinated by a per-page drain-lock/reference word.

mod page;

use core::{
    alloc::Layout,
    ptr::NonNull,
    slice,
    sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering::SeqCst},
};

use self::page::{Page, SUBMAP_COUNT};
use crate::{
    base::{BaseAlloc, Chunk},
    probe,
    stat::Stat,
};

pub(crate) const PAGE_SHIFT: usize = 12;
/// The size of one page of the reserved range.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The smallest supported object size. Anything below would need more than
/// 512 slot bits per page.
pub const MIN_OBJ_SIZE: usize = 8;
/// The largest supported object size: one slot spanning a whole page.
pub const MAX_OBJ_SIZE: usize = PAGE_SIZE;

/// A fixed-size object allocator over a capped range of pages.
///
/// One instance serves objects of a single size from `max_pages` reserved
/// pages, of which only a prefix is live at any moment. Any number of
/// threads may call [`allocate`](Self::allocate) and
/// [`deallocate`](Self::deallocate) concurrently; there is no mutex
/// anywhere, only atomic read-modify-write operations on the page metadata.
///
/// Dropping the slab releases the whole range. Every allocation must have
/// been deallocated, or at least never touched again, before the drop.
pub struct Slab<B: BaseAlloc> {
    base: B,
    chunk: Chunk<B>,
    header: Chunk<B>,
    obj_size: usize,
    slot_count: usize,
    virt_pages: usize,
    phys_pages: AtomicUsize,
    allocated: AtomicUsize,
    coord: AtomicBool,
}

impl<B: BaseAlloc> Slab<B> {
    /// Reserves the object range and the page metadata for a new instance.
    ///
    /// `obj_size` must lie in [`MIN_OBJ_SIZE`]`..=`[`MAX_OBJ_SIZE`] and
    /// `max_pages` must be at least 1. The first page is live immediately;
    /// the rest are published by demand-driven expansion.
    pub fn new(base: B, obj_size: usize, max_pages: usize) -> Result<Self, Error<B>> {
        if !(MIN_OBJ_SIZE..=MAX_OBJ_SIZE).contains(&obj_size) {
            return Err(Error::ObjSize(obj_size));
        }
        let size = match max_pages.checked_mul(PAGE_SIZE) {
            Some(size) if max_pages > 0 => size,
            _ => return Err(Error::PageCount(max_pages)),
        };

        let layout =
            Layout::from_size_align(size, PAGE_SIZE).map_err(|_| Error::PageCount(max_pages))?;
        let header_layout =
            Layout::array::<Page>(max_pages).map_err(|_| Error::PageCount(max_pages))?;

        let chunk = base.clone().reserve(layout).map_err(Error::Os)?;
        let header = base.clone().reserve(header_layout).map_err(Error::Os)?;

        let slab = Slab {
            base,
            chunk,
            header,
            obj_size,
            slot_count: PAGE_SIZE / obj_size,
            virt_pages: max_pages,
            phys_pages: AtomicUsize::new(1),
            allocated: AtomicUsize::new(0),
            coord: AtomicBool::new(false),
        };

        let pages = slab.header.pointer().cast::<Page>().as_ptr();
        for index in 0..max_pages {
            // SAFETY: the header chunk holds `max_pages` aligned `Page`
            // cells.
            unsafe { pages.add(index).write(Page::new(slab.slot_count)) };
        }
        // Every page is born drain-locked; the first is live from the start.
        slab.pages()[0].refcnt.unlock_drain();

        Ok(slab)
    }

    fn pages(&self) -> &[Page] {
        let ptr = self.header.pointer().cast::<Page>();
        // SAFETY: written in `new`; the cells live as long as the header
        // chunk.
        unsafe { slice::from_raw_parts(ptr.as_ptr(), self.virt_pages) }
    }

    pub(crate) fn base_ptr(&self) -> NonNull<u8> {
        self.chunk.pointer().cast()
    }

    fn capacity(&self, phys: usize) -> usize {
        phys * self.slot_count
    }

    /// The object size served by this instance.
    pub fn obj_size(&self) -> usize {
        self.obj_size
    }

    /// Real slots per page: `PAGE_SIZE / obj_size`.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// The page cap fixed at construction.
    pub fn virt_pages(&self) -> usize {
        self.virt_pages
    }

    pub fn stat(&self) -> Stat {
        Stat {
            phys_pages: self.phys_pages.load(SeqCst),
            virt_pages: self.virt_pages,
            allocated: self.allocated.load(SeqCst),
        }
    }

    /// Claims one object slot.
    ///
    /// Returns a block of exactly [`obj_size`](Self::obj_size) bytes inside
    /// the instance's range, owned by the caller until the matching
    /// [`deallocate`](Self::deallocate). `None` means every live page is
    /// full and the page cap forbids further expansion; that is
    /// back-pressure, not a fault.
    ///
    /// Lock-free: every failed compare-exchange means another thread claimed
    /// a slot, and a fully failed scan either publishes a page or gives up.
    pub fn allocate(&self) -> Option<NonNull<[u8]>> {
        loop {
            if let Some(ptr) = self.try_claim() {
                return Some(ptr);
            }
            if self.phys_pages.load(SeqCst) >= self.virt_pages {
                return None;
            }
            // A fresh page may already be justified; publish and rescan.
            self.expand();
        }
    }

    fn try_claim(&self) -> Option<NonNull<[u8]>> {
        let phys = self.phys_pages.load(SeqCst);
        let pages = self.pages();
        let page_start = probe::next() as usize % phys;

        for i in 0..phys {
            let index = (page_start + i) % phys;
            let page = &pages[index];
            if !page.refcnt.try_acquire() {
                // Drain-locked: a shrink is in flight, or the page was
                // reclaimed under us.
                continue;
            }

            let sub_start = probe::next() as usize % SUBMAP_COUNT;
            if let Some(slot) = page.claim(sub_start) {
                self.allocated.fetch_add(1, SeqCst);
                self.expand();
                // The page reference is kept: it stands for this outstanding
                // allocation and is dropped by the matching deallocate.
                let offset = (index << PAGE_SHIFT) + slot * self.obj_size;
                // SAFETY: `index` is a live page and `slot` a real slot, so
                // the offset stays within the reservation.
                let ptr = unsafe { self.base_ptr().add(offset) };
                return Some(NonNull::slice_from_raw_parts(ptr, self.obj_size));
            }

            page.refcnt.release();
        }
        None
    }

    /// Releases a block previously returned by
    /// [`allocate`](Self::allocate).
    ///
    /// Pointers outside the instance's range, misaligned within their page,
    /// or pointing past the page's real slot area are rejected without any
    /// state change. The release itself is wait-free: one fetch-and plus the
    /// counter and reference decrements.
    ///
    /// # Safety
    ///
    /// If `ptr` was returned by `allocate` on this instance, it must be
    /// outstanding: releasing a block twice, or a block owned by another
    /// caller, corrupts slot ownership.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let base = self.base_ptr().as_ptr() as usize;
        let Some(diff) = (ptr.as_ptr() as usize).checked_sub(base) else {
            return;
        };
        if diff >= self.virt_pages << PAGE_SHIFT {
            return;
        }

        let index = diff >> PAGE_SHIFT;
        let offset = diff & (PAGE_SIZE - 1);
        if offset % self.obj_size != 0 {
            return;
        }
        let slot = offset / self.obj_size;
        if slot >= self.slot_count {
            return;
        }

        let page = &self.pages()[index];
        page.release_slot(slot);
        self.allocated.fetch_sub(1, SeqCst);
        page.refcnt.release();

        self.shrink();
    }

    /// Publishes one more page once usage crosses half of the live
    /// capacity. Single-flight: losers of the coordination flag return
    /// immediately.
    fn expand(&self) {
        let used = self.allocated.load(SeqCst);
        let phys = self.phys_pages.load(SeqCst);
        if used < self.capacity(phys) / 2 {
            return;
        }
        let coord = self.coord.compare_exchange(false, true, SeqCst, SeqCst);
        if coord.is_err() {
            return;
        }

        let phys = self.phys_pages.load(SeqCst);
        if phys < self.virt_pages {
            // The bitmap was prepared at construction and the ref word is
            // still drain-locked, so publishing is exactly the unlock.
            let index = self.phys_pages.fetch_add(1, SeqCst);
            self.pages()[index].refcnt.unlock_drain();
        }

        self.coord.store(false, SeqCst);
    }

    /// Reclaims trailing pages while usage stays at or below an eighth of
    /// the live capacity. The first page is never reclaimed.
    fn shrink(&self) {
        let used = self.allocated.load(SeqCst);
        let phys = self.phys_pages.load(SeqCst);
        if used > self.capacity(phys) / 8 {
            return;
        }
        let coord = self.coord.compare_exchange(false, true, SeqCst, SeqCst);
        if coord.is_err() {
            return;
        }

        loop {
            let phys = self.phys_pages.load(SeqCst);
            let last = phys - 1;
            if last == 0 || self.allocated.load(SeqCst) > self.capacity(phys) / 8 {
                break;
            }

            let page = &self.pages()[last];
            page.refcnt.lock_drain();
            // In-flight acquirers either observe the drain bit and back
            // out, or are already counted in the word read below.
            fence(SeqCst);
            if !page.refcnt.is_reclaimable() {
                page.refcnt.unlock_drain();
                break;
            }

            // SAFETY: a zero refcount means no outstanding allocation lives
            // on the page, so its contents may be discarded.
            unsafe { self.base.decommit(self.page_memory(last)) };
            self.phys_pages.fetch_sub(1, SeqCst);
        }

        self.coord.store(false, SeqCst);
    }

    fn page_memory(&self, index: usize) -> NonNull<[u8]> {
        // SAFETY: `index` is within the reserved range.
        let ptr = unsafe { self.base_ptr().add(index << PAGE_SHIFT) };
        NonNull::slice_from_raw_parts(ptr, PAGE_SIZE)
    }

    /// Outstanding slot bits across the whole range, sentinels excluded.
    #[cfg(test)]
    pub(crate) fn used_bits(&self) -> usize {
        (self.pages().iter())
            .map(|page| page.used_bits(self.slot_count))
            .sum()
    }
}

#[derive(Debug)]
pub enum Error<B: BaseAlloc> {
    /// The virtual-memory provider refused the reservation.
    Os(B::Error),
    /// The object size lies outside [`MIN_OBJ_SIZE`]`..=`[`MAX_OBJ_SIZE`].
    ObjSize(usize),
    /// A page cap of zero, or one large enough to overflow the reservation.
    PageCount(usize),
}
