//! A fixed-size object allocator for heavily concurrent workloads.
//!
//! One [`Slab`] serves objects of a single size (8 to 4096 bytes) out of a
//! contiguous reservation of up to `max_pages` 4 KiB pages. Slot ownership
//! lives in per-page atomic bitmaps whose words sit on separate cachelines;
//! allocation claims a bit with one compare-exchange per probed word and
//! deallocation clears it with one fetch-and. Physical pages are published
//! when usage crosses half of the live capacity and drained back to the OS
//! when it falls below an eighth.
//!
//! ```
//! use bmslab::{Mmap, Slab};
//!
//! let slab = Slab::new(Mmap::new(), 64, 4).unwrap();
//! let ptr = slab.allocate().unwrap();
//! assert_eq!(ptr.len(), 64);
//! // SAFETY: `ptr` is outstanding and came from this slab.
//! unsafe { slab.deallocate(ptr.cast()) };
//! slab.stat().assert_clean();
//! ```

pub mod base;
mod probe;
pub mod slab;
pub mod stat;

pub use self::{
    base::{BaseAlloc, Chunk, Mmap},
    slab::{Error, Slab, MAX_OBJ_SIZE, MIN_OBJ_SIZE, PAGE_SIZE},
    stat::Stat,
};
