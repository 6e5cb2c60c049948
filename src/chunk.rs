//! Cursor-tracked views over memory regions.
//!
//! A [`Chunk`] divides its region into five zones:
//!
//! ```text
//! 0 ── start gap ── read_pos ── write_pos ── limit ── capacity
//!      reserved      readable     writable    end gap
//! ```
//!
//! The invariant `start_gap <= read_pos <= write_pos <= limit <= capacity`
//! holds at all times. Gaps are reservations, not data: space set aside for
//! later in-place writes such as length prefixes or values that would
//! otherwise straddle a chunk boundary.

use crate::error::{Error, Result};
use crate::memory::Memory;

/// End-gap headroom reserved in every chain chunk.
///
/// Large enough that any fixed-width primitive (up to 8 bytes) or UTF-8
/// scalar (up to 4 bytes) fits the current chunk once a writer has prepared
/// it, so no value is ever split across chunks.
pub const RESERVED_SIZE: usize = 8;

/// A bounded view over one [`Memory`] region with read/write cursors,
/// linkable into a chain via `next`.
pub struct Chunk {
    memory: Memory,
    start_gap: usize,
    read_pos: usize,
    write_pos: usize,
    limit: usize,
    pub(crate) next: Option<Box<Chunk>>,
    /// A duplicate view over another chunk's memory. Views are never pushed
    /// to the pool free list as owners.
    pub(crate) view: bool,
}

impl Chunk {
    /// Wrap a region as a fresh, fully writable chunk.
    pub(crate) fn new(memory: Memory) -> Chunk {
        let limit = memory.len();
        Chunk {
            memory,
            start_gap: 0,
            read_pos: 0,
            write_pos: 0,
            limit,
            next: None,
            view: false,
        }
    }

    // ── Cursor accessors ────────────────────────────────────────────────

    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn start_gap(&self) -> usize {
        self.start_gap
    }

    #[inline]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    #[inline]
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reserved bytes between `limit` and `capacity`.
    #[inline]
    pub fn end_gap(&self) -> usize {
        self.capacity() - self.limit
    }

    /// Bytes available for reading.
    #[inline]
    pub fn read_remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available for writing.
    #[inline]
    pub fn write_remaining(&self) -> usize {
        self.limit - self.write_pos
    }

    #[inline]
    pub fn can_read(&self) -> bool {
        self.write_pos > self.read_pos
    }

    #[inline]
    pub fn can_write(&self) -> bool {
        self.limit > self.write_pos
    }

    /// Handle to the underlying region (cheap clone of the handle).
    pub(crate) fn memory_handle(&self) -> Memory {
        self.memory.clone()
    }

    #[inline]
    pub(crate) fn memory(&self) -> &Memory {
        &self.memory
    }

    // ── Cursor movement (exact arithmetic, fail fast) ───────────────────

    /// Advance the read position by `n` bytes.
    pub fn discard(&mut self, n: usize) -> Result<()> {
        if n > self.read_remaining() {
            return Err(Error::Discard {
                requested: n,
                available: self.read_remaining(),
            });
        }
        self.read_pos += n;
        Ok(())
    }

    /// Advance the write position by `n` bytes already stored in the region.
    pub fn commit_written(&mut self, n: usize) -> Result<()> {
        if n > self.write_remaining() {
            return Err(Error::Commit {
                requested: n,
                available: self.write_remaining(),
            });
        }
        self.write_pos += n;
        Ok(())
    }

    /// Move the read position backward by `n` bytes, re-exposing bytes
    /// already read. Cannot cross below the start gap.
    pub fn rewind(&mut self, n: usize) -> Result<()> {
        let behind = self.read_pos - self.start_gap;
        if n > behind {
            return Err(Error::Rewind {
                requested: n,
                available: behind,
            });
        }
        self.read_pos -= n;
        Ok(())
    }

    /// Set the read position to an absolute offset. Cached-cursor
    /// reconciliation path for readers.
    pub(crate) fn discard_to(&mut self, pos: usize) {
        debug_assert!(pos >= self.read_pos && pos <= self.write_pos);
        self.read_pos = pos;
    }

    /// Set the write position to an absolute offset. Cached-cursor
    /// reconciliation path for writers.
    pub(crate) fn commit_written_to(&mut self, pos: usize) {
        debug_assert!(pos >= self.write_pos && pos <= self.limit);
        self.write_pos = pos;
    }

    // ── Gap reservations ────────────────────────────────────────────────

    /// Reserve `gap` bytes at the start of the region.
    ///
    /// If the read position is already at or past `gap` the reservation is
    /// only recorded. An empty chunk relocates both cursors to `gap`. A
    /// chunk holding live content below `gap` fails: reservation never moves
    /// data.
    pub fn reserve_start_gap(&mut self, gap: usize) -> Result<()> {
        if self.read_pos >= gap {
            self.start_gap = gap;
            return Ok(());
        }
        if self.read_pos == self.write_pos {
            if gap > self.limit {
                return Err(Error::StartGap {
                    gap,
                    reason: "gap would overlap the reserved end gap",
                });
            }
            self.read_pos = gap;
            self.write_pos = gap;
            self.start_gap = gap;
            return Ok(());
        }
        Err(Error::StartGap {
            gap,
            reason: "live content would have to move",
        })
    }

    /// Reserve `gap` bytes at the end of the region, symmetric to
    /// [`reserve_start_gap`](Chunk::reserve_start_gap).
    pub fn reserve_end_gap(&mut self, gap: usize) -> Result<()> {
        if gap > self.capacity() {
            return Err(Error::EndGap {
                gap,
                reason: "gap exceeds the chunk capacity",
            });
        }
        let new_limit = self.capacity() - gap;
        if new_limit >= self.write_pos {
            self.limit = new_limit;
            return Ok(());
        }
        if new_limit < self.start_gap {
            return Err(Error::EndGap {
                gap,
                reason: "gap would overlap the reserved start gap",
            });
        }
        if self.read_pos == self.write_pos {
            // At rest: both cursors may relocate below the new limit.
            self.limit = new_limit;
            self.read_pos = new_limit;
            self.write_pos = new_limit;
            return Ok(());
        }
        Err(Error::EndGap {
            gap,
            reason: "live content extends past the new limit",
        })
    }

    /// Hand back start-gap reservation down to `new_read_pos` after bytes
    /// were written in front of the readable range.
    pub(crate) fn release_start_gap(&mut self, new_read_pos: usize) {
        self.read_pos = new_read_pos;
        if self.start_gap > new_read_pos {
            self.start_gap = new_read_pos;
        }
    }

    /// Extend `limit` into the end gap so up to `extra` more bytes fit.
    pub(crate) fn release_end_gap(&mut self, extra: usize) {
        debug_assert!(extra <= self.end_gap());
        self.limit += extra;
    }

    // ── Reconfiguration ─────────────────────────────────────────────────

    /// Make the whole region readable and nothing writable.
    pub fn reset_for_read(&mut self) {
        self.start_gap = 0;
        self.read_pos = 0;
        self.write_pos = self.capacity();
        self.limit = self.capacity();
    }

    /// Make everything between the reserved gaps writable and nothing
    /// readable.
    pub fn reset_for_write(&mut self) {
        self.read_pos = self.start_gap;
        self.write_pos = self.start_gap;
    }

    /// Forget both gap reservations.
    pub fn reset_gaps(&mut self) {
        self.start_gap = 0;
        self.limit = self.capacity();
    }

    // ── Byte access ─────────────────────────────────────────────────────

    /// Read the next byte without consuming input state on failure.
    pub fn try_peek(&self) -> Option<u8> {
        if self.read_pos == self.write_pos {
            return None;
        }
        Some(self.memory.load_u8(self.read_pos))
    }

    /// Read and consume one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        if !self.can_read() {
            return Err(Error::Underrun {
                requested: 1,
                available: 0,
            });
        }
        let v = self.memory.load_u8(self.read_pos);
        self.read_pos += 1;
        Ok(v)
    }

    /// Write one byte.
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        if !self.can_write() {
            return Err(Error::InsufficientSpace {
                requested: 1,
                available: 0,
            });
        }
        self.memory.store_u8(self.write_pos, v);
        self.write_pos += 1;
        Ok(())
    }

    /// The readable bytes as a slice.
    pub fn readable(&self) -> &[u8] {
        self.memory.as_slice(self.read_pos, self.write_pos)
    }

    /// Append up to `src.len()` bytes, bounded by the writable room.
    /// Returns the number of bytes written.
    pub fn append_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.write_remaining());
        self.memory.write_from(self.write_pos, &src[..n]);
        self.write_pos += n;
        n
    }

    /// Consume up to `dst.len()` readable bytes into `dst`. Returns the
    /// number of bytes moved.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.read_remaining());
        self.memory.read_into(self.read_pos, &mut dst[..n]);
        self.read_pos += n;
        n
    }

    // ── Splice copy primitives ──────────────────────────────────────────

    /// Copy up to `max` readable bytes from `other` onto this chunk's tail,
    /// consuming the end gap if the plain writable room is short. Advances
    /// `other`'s read cursor. Returns the bytes copied.
    pub(crate) fn append_from(&mut self, other: &mut Chunk, max: usize) -> usize {
        let size = other.read_remaining().min(max);
        if self.write_remaining() < size {
            let shortfall = size - self.write_remaining();
            assert!(
                shortfall <= self.end_gap(),
                "append of {size} bytes exceeds writable room plus end gap"
            );
            self.release_end_gap(shortfall);
        }
        other
            .memory
            .copy_to(&self.memory, other.read_pos, size, self.write_pos);
        self.write_pos += size;
        other.read_pos += size;
        size
    }

    /// Copy all of `other`'s readable bytes into this chunk's start gap so
    /// they precede the current readable range. Drains `other`.
    ///
    /// # Panics
    /// Panics if the space before the read position is too small; callers
    /// check eligibility first.
    pub(crate) fn prepend_from(&mut self, other: &mut Chunk) -> usize {
        let size = other.read_remaining();
        assert!(
            size <= self.read_pos,
            "prepend of {size} bytes does not fit before read position {}",
            self.read_pos
        );
        let new_read_pos = self.read_pos - size;
        other
            .memory
            .copy_to(&self.memory, other.read_pos, size, new_read_pos);
        other.read_pos += size;
        self.release_start_gap(new_read_pos);
        size
    }

    #[cfg(test)]
    pub(crate) fn check_invariant(&self) {
        debug_assert!(
            self.start_gap <= self.read_pos
                && self.read_pos <= self.write_pos
                && self.write_pos <= self.limit
                && self.limit <= self.capacity(),
            "chunk cursor invariant violated: gap {} read {} write {} limit {} cap {}",
            self.start_gap,
            self.read_pos,
            self.write_pos,
            self.limit,
            self.capacity()
        );
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // Unlink iteratively so dropping a long chain cannot recurse.
        let mut next = self.next.take();
        while let Some(mut chunk) = next {
            next = chunk.next.take();
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("start_gap", &self.start_gap)
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("view", &self.view)
            .field("linked", &self.next.is_some())
            .finish()
    }
}
