//! Starting-index hashing for page and sub-bitmap scans.

use core::cell::Cell;

thread_local! {
    static SEED: Cell<u32> = const { Cell::new(0) };
}

/// MurmurHash3 32-bit finalizer.
fn mix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hashes the current stack position with a per-thread counter.
///
/// The counter advances on every call and the finalizer is a bijection, so
/// repeated probes from one thread never collapse onto the same index, and
/// distinct threads start from well-separated positions.
pub(crate) fn next() -> u32 {
    let anchor = 0u8;
    let addr = &anchor as *const u8 as usize as u64;
    let salt = SEED.with(|seed| {
        let cur = seed.get();
        seed.set(cur.wrapping_add(1));
        cur
    });
    mix32((addr ^ (addr >> 32)) as u32 ^ salt)
}
