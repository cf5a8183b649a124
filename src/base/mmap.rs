use core::{alloc::Layout, mem::ManuallyDrop, ptr::NonNull};

use region::{Allocation, Protection};

use super::{BaseAlloc, Chunk};

/// A base provider backed by the `mmap` function series.
#[derive(Debug, Clone, Copy, Default, Hash)]
pub struct Mmap;

impl Mmap {
    /// Creates a new `mmap` base provider.
    pub const fn new() -> Self {
        Mmap
    }
}

/// An owned `mmap` reservation. The mapping itself is process-global state
/// and the handle is uniquely owned by its `Chunk`, so it may travel across
/// and be shared between threads.
pub struct MmapHandle(ManuallyDrop<Allocation>);

unsafe impl Send for MmapHandle {}
unsafe impl Sync for MmapHandle {}

unsafe impl BaseAlloc for Mmap {
    type Error = region::Error;
    type Handle = MmapHandle;

    fn reserve(self, layout: Layout) -> Result<Chunk<Self>, Self::Error> {
        fn round_up(addr: usize, layout: Layout) -> usize {
            (addr + layout.align() - 1) & !(layout.align() - 1)
        }

        let mut trial = region::alloc(layout.size(), Protection::READ_WRITE)?;
        if trial.as_ptr::<u8>() as usize % layout.align() == 0 {
            let ptr = NonNull::new(trial.as_mut_ptr()).unwrap();
            // SAFETY: `Chunk` is reserved from self.
            return Ok(unsafe { Chunk::new(ptr, layout, MmapHandle(ManuallyDrop::new(trial))) });
        }

        drop(trial);
        let mut wide = region::alloc(layout.size() + layout.align(), Protection::READ_WRITE)?;
        let base = wide.as_mut_ptr::<u8>();
        let offset = round_up(base as usize, layout) - base as usize;
        // SAFETY: the over-reservation leaves room for the round-up.
        let ptr = NonNull::new(unsafe { base.add(offset) });

        // SAFETY: `Chunk` is reserved from self.
        Ok(unsafe { Chunk::new(ptr.unwrap(), layout, MmapHandle(ManuallyDrop::new(wide))) })
    }

    unsafe fn release(chunk: &mut Chunk<Self>) {
        unsafe { ManuallyDrop::drop(&mut chunk.handle.0) }
    }

    unsafe fn decommit(&self, ptr: NonNull<[u8]>) {
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
        const ADVICE: libc::c_int = libc::MADV_FREE;
        #[cfg(all(
            unix,
            not(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))
        ))]
        const ADVICE: libc::c_int = libc::MADV_DONTNEED;

        #[cfg(unix)]
        unsafe {
            libc::madvise(ptr.as_ptr().cast(), ptr.len(), ADVICE);
        }
        #[cfg(not(unix))]
        let _ = ptr;
    }
}
