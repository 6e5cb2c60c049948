//! Flat, bounds-checked memory regions shared between chunk views.
//!
//! A [`Memory`] is a fixed-size heap region with indexed access to bytes and
//! big-endian fixed-width values. Duplicated chunk views of one packet share
//! the same region through an [`Arc`]; the region carries the atomic share
//! count that gates its return to the pool.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Heap allocation backing one or more [`Memory`] handles.
///
/// The share count is the ownership protocol, not the `Arc` count: it is 1
/// while a chunk owns the region exclusively, incremented per duplicate view,
/// and must reach 0 before the region may re-enter the pool.
struct Slab {
    ptr: *mut u8,
    len: usize,
    shares: AtomicI32,
}

// Safety: the slab owns its allocation; concurrent access is governed by the
// share-count protocol (views of a finished packet are read-only).
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Drop for Slab {
    fn drop(&mut self) {
        // Safety: ptr/len came from Box::into_raw of a boxed slice in alloc().
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr, self.len,
            )));
        }
    }
}

/// A bounds-checked, fixed-size byte region.
///
/// Cloning a `Memory` clones the handle, not the bytes. All indexed accessors
/// panic on out-of-range offsets: an offset past the region is a bug in the
/// caller, never a data-dependent condition.
///
/// Writes require that the caller holds the region exclusively (share count
/// 1) or writes only into space no reader view can observe; both are
/// guaranteed by the chunk cursor protocol.
#[derive(Clone)]
pub struct Memory {
    slab: Arc<Slab>,
}

impl Memory {
    /// Allocate a zero-filled region of `len` bytes with share count 1.
    pub fn alloc(len: usize) -> Memory {
        let boxed = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Memory {
            slab: Arc::new(Slab {
                ptr,
                len,
                shares: AtomicI32::new(1),
            }),
        }
    }

    /// Region size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.slab.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slab.len == 0
    }

    /// `true` if both handles refer to the same underlying region.
    pub fn same_region(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.slab, &other.slab)
    }

    #[inline]
    fn check(&self, at: usize, width: usize) {
        assert!(
            at.checked_add(width).is_some_and(|end| end <= self.slab.len),
            "memory access out of bounds: offset {at} width {width} in region of {}",
            self.slab.len
        );
    }

    /// Borrow `start..end` as a byte slice.
    ///
    /// The returned slice aliases the shared region; callers must not write
    /// through another handle while holding it (guaranteed by the cursor
    /// protocol: readable ranges are frozen while shared).
    pub fn as_slice(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end, "slice start {start} after end {end}");
        self.check(start, end - start);
        // Safety: bounds checked above; the region outlives `self`.
        unsafe { std::slice::from_raw_parts(self.slab.ptr.add(start), end - start) }
    }

    /// Copy `dst.len()` bytes starting at `at` into `dst`.
    pub fn read_into(&self, at: usize, dst: &mut [u8]) {
        self.check(at, dst.len());
        // Safety: bounds checked; dst is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(self.slab.ptr.add(at), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into the region starting at `at`.
    pub fn write_from(&self, at: usize, src: &[u8]) {
        self.check(at, src.len());
        // Safety: bounds checked; src is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.slab.ptr.add(at), src.len());
        }
    }

    /// Copy `len` bytes from `self[src_at..]` into `dst[dst_at..]`.
    ///
    /// The regions may be the same (overlap is handled).
    pub fn copy_to(&self, dst: &Memory, src_at: usize, len: usize, dst_at: usize) {
        self.check(src_at, len);
        dst.check(dst_at, len);
        // Safety: both ranges bounds checked; copy handles overlap.
        unsafe {
            std::ptr::copy(self.slab.ptr.add(src_at), dst.slab.ptr.add(dst_at), len);
        }
    }

    // ── Indexed big-endian accessors ────────────────────────────────────

    #[inline]
    pub fn load_u8(&self, at: usize) -> u8 {
        self.check(at, 1);
        // Safety: bounds checked.
        unsafe { *self.slab.ptr.add(at) }
    }

    #[inline]
    pub fn store_u8(&self, at: usize, v: u8) {
        self.check(at, 1);
        // Safety: bounds checked.
        unsafe { *self.slab.ptr.add(at) = v };
    }

    pub fn load_u16(&self, at: usize) -> u16 {
        let mut b = [0u8; 2];
        self.read_into(at, &mut b);
        u16::from_be_bytes(b)
    }

    pub fn store_u16(&self, at: usize, v: u16) {
        self.write_from(at, &v.to_be_bytes());
    }

    pub fn load_u32(&self, at: usize) -> u32 {
        let mut b = [0u8; 4];
        self.read_into(at, &mut b);
        u32::from_be_bytes(b)
    }

    pub fn store_u32(&self, at: usize, v: u32) {
        self.write_from(at, &v.to_be_bytes());
    }

    pub fn load_u64(&self, at: usize) -> u64 {
        let mut b = [0u8; 8];
        self.read_into(at, &mut b);
        u64::from_be_bytes(b)
    }

    pub fn store_u64(&self, at: usize, v: u64) {
        self.write_from(at, &v.to_be_bytes());
    }

    pub fn load_i16(&self, at: usize) -> i16 {
        self.load_u16(at) as i16
    }

    pub fn store_i16(&self, at: usize, v: i16) {
        self.store_u16(at, v as u16);
    }

    pub fn load_i32(&self, at: usize) -> i32 {
        self.load_u32(at) as i32
    }

    pub fn store_i32(&self, at: usize, v: i32) {
        self.store_u32(at, v as u32);
    }

    pub fn load_i64(&self, at: usize) -> i64 {
        self.load_u64(at) as i64
    }

    pub fn store_i64(&self, at: usize, v: i64) {
        self.store_u64(at, v as u64);
    }

    pub fn load_f32(&self, at: usize) -> f32 {
        f32::from_bits(self.load_u32(at))
    }

    pub fn store_f32(&self, at: usize, v: f32) {
        self.store_u32(at, v.to_bits());
    }

    pub fn load_f64(&self, at: usize) -> f64 {
        f64::from_bits(self.load_u64(at))
    }

    pub fn store_f64(&self, at: usize, v: f64) {
        self.store_u64(at, v.to_bits());
    }

    // ── Share counting ──────────────────────────────────────────────────

    /// Current share count. 1 = exclusively owned, >1 = duplicate views
    /// exist, 0 = released.
    pub(crate) fn share_count(&self) -> i32 {
        self.slab.shares.load(Ordering::Acquire)
    }

    /// Increment the share count for a new duplicate view.
    ///
    /// # Panics
    /// Panics if the region was already fully released.
    pub(crate) fn acquire_share(&self) {
        let r = self
            .slab
            .shares
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                if old <= 0 {
                    None
                } else {
                    Some(old + 1)
                }
            });
        assert!(r.is_ok(), "cannot duplicate a released chunk");
    }

    /// Decrement the share count and return the new value.
    ///
    /// # Panics
    /// Panics on release of an already fully released region.
    pub(crate) fn release_share(&self) -> i32 {
        let old = self
            .slab
            .shares
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                if old <= 0 {
                    None
                } else {
                    Some(old - 1)
                }
            });
        match old {
            Ok(old) => old - 1,
            Err(_) => panic!("cannot release a chunk that is already released"),
        }
    }

    /// Transition a pooled region from released (0) back to exclusively
    /// owned (1), as part of a pool borrow.
    ///
    /// # Panics
    /// Panics if the region is still in use: a referenced region must never
    /// sit on the free list.
    pub(crate) fn force_exclusive(&self) {
        let r = self
            .slab
            .shares
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);
        assert!(
            r.is_ok(),
            "pooled chunk is still referenced (share count {})",
            r.unwrap_err()
        );
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("len", &self.slab.len)
            .field("shares", &self.share_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_big_endian() {
        let m = Memory::alloc(64);
        m.store_u16(0, 0x1234);
        m.store_u32(2, 0xdead_beef);
        m.store_u64(6, 0x0102_0304_0506_0708);
        m.store_i32(14, -7);
        m.store_f64(18, 2.5);

        assert_eq!(m.load_u16(0), 0x1234);
        assert_eq!(m.load_u32(2), 0xdead_beef);
        assert_eq!(m.load_u64(6), 0x0102_0304_0506_0708);
        assert_eq!(m.load_i32(14), -7);
        assert_eq!(m.load_f64(18), 2.5);
    }

    #[test]
    fn big_endian_byte_layout() {
        let m = Memory::alloc(8);
        m.store_u32(0, 0x0102_0304);
        assert_eq!(m.as_slice(0, 4), &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn load_past_end_panics() {
        let m = Memory::alloc(4);
        m.load_u32(1);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn store_past_end_panics() {
        let m = Memory::alloc(4);
        m.store_u8(4, 0);
    }

    #[test]
    fn bulk_copy_between_regions() {
        let a = Memory::alloc(16);
        let b = Memory::alloc(16);
        a.write_from(0, b"hello world");
        a.copy_to(&b, 6, 5, 0);
        assert_eq!(b.as_slice(0, 5), b"world");
    }

    #[test]
    fn overlapping_copy_within_region() {
        let m = Memory::alloc(16);
        m.write_from(0, b"abcdef");
        m.copy_to(&m, 0, 6, 2);
        assert_eq!(m.as_slice(0, 8), b"ababcdef");
    }

    #[test]
    fn share_count_protocol() {
        let m = Memory::alloc(8);
        assert_eq!(m.share_count(), 1);
        m.acquire_share();
        assert_eq!(m.share_count(), 2);
        assert_eq!(m.release_share(), 1);
        assert_eq!(m.release_share(), 0);
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn over_release_panics() {
        let m = Memory::alloc(8);
        m.release_share();
        m.release_share();
    }

    #[test]
    #[should_panic(expected = "cannot duplicate")]
    fn acquire_after_release_panics() {
        let m = Memory::alloc(8);
        m.release_share();
        m.acquire_share();
    }

    #[test]
    fn force_exclusive_from_free() {
        let m = Memory::alloc(8);
        m.release_share();
        m.force_exclusive();
        assert_eq!(m.share_count(), 1);
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn force_exclusive_in_use_panics() {
        let m = Memory::alloc(8);
        m.force_exclusive();
    }
}
