//! Sequential consumption of chunk chains.
//!
//! A [`Reader`] drains a chain front to back, releasing each head chunk to
//! the pool as it empties and pulling replacements from its [`Source`] once
//! the chain runs dry. The hot path (`read_u8`, `try_peek`) runs on cached
//! head cursors with no chunk indirection; cached state is reconciled into
//! the head chunk whenever the chain itself is inspected or restructured.
//!
//! Decoders that want to work on raw chunk memory use the head-preparation
//! protocol: [`Reader::prepare_read`] yields the head chunk with at least a
//! requested number of contiguous readable bytes — merging bytes from the
//! successor into the head's end-gap headroom when a value straddles a
//! boundary — and [`Reader::complete_read`] commits whatever the caller
//! consumed.

use std::io;
use std::sync::Arc;

use crate::chain::release_chain;
use crate::chunk::{Chunk, RESERVED_SIZE};
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::pool::ChunkPool;

/// Hook for pulling more bytes from a device once a reader's chain is
/// exhausted.
pub trait Source {
    /// Fill `dst` (reset for writing, end gap reserved) with more bytes.
    ///
    /// Returns `Ok(true)` if any bytes were written, `Ok(false)` once the
    /// source has genuinely ended. A `true` return with nothing written is
    /// treated as end of source.
    fn fill(&mut self, dst: &mut Chunk) -> io::Result<bool>;

    /// Close the underlying device. Called once from
    /// [`Reader::close`].
    fn close_source(&mut self) {}
}

/// The source of a pure in-memory chain: never produces more bytes.
pub struct NoSource;

impl Source for NoSource {
    fn fill(&mut self, _dst: &mut Chunk) -> io::Result<bool> {
        Ok(false)
    }
}

/// Sequential reader over a chunk chain, optionally refillable from a
/// [`Source`].
///
/// A [`Packet`](crate::Packet) is a `Reader` over a fixed chain.
pub struct Reader<S: Source = NoSource> {
    pub(crate) head: Option<Box<Chunk>>,
    // Cached head cursors: the read position lives here between calls; it
    // is written back into the chunk before any chain restructuring.
    pub(crate) head_mem: Option<Memory>,
    pub(crate) head_pos: usize,
    pub(crate) head_end: usize,
    /// Readable bytes buffered in chunks after the head.
    pub(crate) tail_remaining: u64,
    pub(crate) no_more_chunks: bool,
    pub(crate) pool: Arc<ChunkPool>,
    pub(crate) source: S,
}

impl<S: Source> Reader<S> {
    /// Create a reader with an empty chain that pulls from `source` on
    /// demand.
    pub fn new(source: S, pool: Arc<ChunkPool>) -> Reader<S> {
        Reader {
            head: None,
            head_mem: None,
            head_pos: 0,
            head_end: 0,
            tail_remaining: 0,
            no_more_chunks: false,
            pool,
            source,
        }
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ChunkPool> {
        &self.pool
    }

    /// Readable bytes currently buffered. A refillable source may add more.
    #[inline]
    pub fn remaining(&self) -> u64 {
        (self.head_end - self.head_pos) as u64 + self.tail_remaining
    }

    /// Readable bytes in the current head chunk.
    #[inline]
    pub(crate) fn head_remaining(&self) -> usize {
        self.head_end - self.head_pos
    }

    /// `true` once everything buffered is consumed and the source is known
    /// to have ended.
    pub fn at_end(&self) -> bool {
        self.remaining() == 0 && self.no_more_chunks
    }

    // ── Cached-cursor reconciliation ────────────────────────────────────

    /// Write the cached read position back into the head chunk.
    fn sync_head(&mut self) {
        if let Some(h) = self.head.as_deref_mut() {
            h.discard_to(self.head_pos);
        }
    }

    /// Refresh the cached cursors from the current head chunk.
    fn recache(&mut self) {
        match self.head.as_deref() {
            Some(h) => {
                self.head_mem = Some(h.memory_handle());
                self.head_pos = h.read_pos();
                self.head_end = h.write_pos();
            }
            None => {
                self.head_mem = None;
                self.head_pos = 0;
                self.head_end = 0;
            }
        }
    }

    /// Release the (synced, exhausted) head chunk and promote its successor.
    fn drop_head(&mut self) {
        let mut old = self.head.take().expect("chain is non-empty");
        let next = old.clean_next();
        if let Some(n) = next.as_deref() {
            self.tail_remaining -= n.read_remaining() as u64;
        }
        self.head = next;
        (*old).release(&self.pool);
    }

    /// Borrow a chunk and ask the source to fill it. `Ok(None)` marks the
    /// source as ended.
    fn pull_chunk(&mut self) -> Result<Option<Box<Chunk>>> {
        if self.no_more_chunks {
            return Ok(None);
        }
        let mut chunk = self.pool.borrow();
        chunk
            .reserve_end_gap(RESERVED_SIZE)
            .expect("pool chunks exceed the reserve");
        let produced = match self.source.fill(&mut chunk) {
            Ok(p) => p,
            Err(e) => {
                chunk.release(&self.pool);
                return Err(e.into());
            }
        };
        if produced && chunk.can_read() {
            Ok(Some(Box::new(chunk)))
        } else {
            self.no_more_chunks = true;
            chunk.release(&self.pool);
            Ok(None)
        }
    }

    /// With the cached cursors synced and the head missing or empty, make
    /// the head readable again. Returns `false` at genuine end of input.
    fn advance_or_fill(&mut self) -> Result<bool> {
        loop {
            match self.head.as_deref() {
                Some(h) if h.can_read() => {
                    self.recache();
                    return Ok(true);
                }
                Some(_) => self.drop_head(),
                None => match self.pull_chunk()? {
                    Some(chunk) => {
                        self.head = Some(chunk);
                        self.recache();
                        return Ok(true);
                    }
                    None => {
                        self.recache();
                        return Ok(false);
                    }
                },
            }
        }
    }

    // ── Head-preparation protocol ───────────────────────────────────────

    /// Prepare the head chunk with at least `min` contiguous readable
    /// bytes and borrow it. Returns `Ok(None)` when the input ends before
    /// `min` bytes are available.
    ///
    /// When the head holds some but fewer than `min` bytes, bytes are
    /// copied from the successor into the head's end-gap headroom, so a
    /// fixed-width value never straddles a chunk boundary from the
    /// caller's point of view. `min` larger than the headroom allows
    /// fails with [`Error::InsufficientSpace`].
    ///
    /// Pair every preparation with [`Reader::complete_read`] after
    /// consuming from the chunk; other reader methods must not be called
    /// in between.
    pub fn prepare_read(&mut self, min: usize) -> Result<Option<&mut Chunk>> {
        self.sync_head();
        loop {
            let head_has = match self.head.as_deref() {
                Some(h) => h.read_remaining(),
                None => {
                    if !self.advance_or_fill()? {
                        return Ok(None);
                    }
                    self.sync_head();
                    continue;
                }
            };
            if head_has >= min {
                break;
            }
            if head_has == 0 {
                self.drop_head();
                continue;
            }
            if !self.merge_into_head(min)? {
                self.recache();
                return Ok(None);
            }
            break;
        }
        self.recache();
        Ok(self.head.as_deref_mut())
    }

    /// Commit consumption performed on a prepared head chunk and release
    /// it if it is now empty.
    pub fn complete_read(&mut self) {
        loop {
            match self.head.as_deref() {
                Some(h) if !h.can_read() => self.drop_head(),
                _ => break,
            }
        }
        self.recache();
    }

    /// Pull successor bytes into the head until it holds `min` contiguous
    /// readable bytes. Returns `Ok(false)` at genuine end of input.
    fn merge_into_head(&mut self, min: usize) -> Result<bool> {
        loop {
            let (head_has, usable) = {
                let h = self.head.as_deref().expect("merge requires a head");
                (h.read_remaining(), h.write_remaining() + h.end_gap())
            };
            if head_has >= min {
                return Ok(true);
            }
            if self.head.as_deref().expect("present").next().is_none() {
                match self.pull_chunk()? {
                    Some(chunk) => {
                        self.tail_remaining += chunk.read_remaining() as u64;
                        self.head
                            .as_deref_mut()
                            .expect("present")
                            .append_next(chunk);
                    }
                    None => return Ok(false),
                }
            }
            let need = min - head_has;
            if need > usable {
                return Err(Error::InsufficientSpace {
                    requested: min,
                    available: head_has + usable,
                });
            }
            let head = self.head.as_deref_mut().expect("present");
            let mut next = head.clean_next().expect("ensured above");
            let copied = head.append_from(&mut next, need);
            self.tail_remaining -= copied as u64;
            if next.read_remaining() == 0 {
                head.next = next.clean_next();
                (*next).release(&self.pool);
            } else {
                head.next = Some(next);
            }
        }
    }

    // ── Byte reads ──────────────────────────────────────────────────────

    /// Read and consume one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        if self.head_pos < self.head_end {
            let v = self
                .head_mem
                .as_ref()
                .expect("cached head")
                .load_u8(self.head_pos);
            self.head_pos += 1;
            return Ok(v);
        }
        self.read_u8_slow()
    }

    fn read_u8_slow(&mut self) -> Result<u8> {
        self.sync_head();
        if !self.advance_or_fill()? {
            return Err(Error::Underrun {
                requested: 1,
                available: 0,
            });
        }
        self.read_u8()
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|v| v as i8)
    }

    /// Peek the next byte without consuming it. `Ok(None)` at end of input.
    pub fn try_peek(&mut self) -> Result<Option<u8>> {
        if self.head_pos < self.head_end {
            return Ok(Some(
                self.head_mem
                    .as_ref()
                    .expect("cached head")
                    .load_u8(self.head_pos),
            ));
        }
        self.sync_head();
        if !self.advance_or_fill()? {
            return Ok(None);
        }
        Ok(Some(
            self.head_mem
                .as_ref()
                .expect("cached head")
                .load_u8(self.head_pos),
        ))
    }

    /// Drop at most `n` bytes. Returns how many were dropped; exhausted
    /// head chunks are released along the way.
    pub fn discard(&mut self, n: u64) -> Result<u64> {
        let mut left = n;
        while left > 0 {
            let avail = (self.head_end - self.head_pos) as u64;
            if avail == 0 {
                self.sync_head();
                if !self.advance_or_fill()? {
                    break;
                }
                continue;
            }
            let take = avail.min(left);
            self.head_pos += take as usize;
            left -= take;
        }
        Ok(n - left)
    }

    /// Drop exactly `n` bytes or fail with [`Error::Underrun`].
    pub fn discard_exact(&mut self, n: u64) -> Result<()> {
        let discarded = self.discard(n)?;
        if discarded != n {
            return Err(Error::Underrun {
                requested: n as usize,
                available: discarded,
            });
        }
        Ok(())
    }

    /// Move the read position backward by `n` bytes within the current
    /// head chunk, re-exposing bytes already read. Chunks released after
    /// full consumption cannot be revisited.
    pub fn rewind(&mut self, n: usize) -> Result<()> {
        self.sync_head();
        match self.head.as_deref_mut() {
            Some(h) => {
                h.rewind(n)?;
                self.recache();
                Ok(())
            }
            None => Err(Error::Rewind {
                requested: n,
                available: 0,
            }),
        }
    }

    /// Fill `dst` completely or fail with [`Error::Underrun`]. On failure
    /// the bytes that were available have been consumed into `dst`.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let total = dst.len();
        let mut off = 0;
        while off < total {
            let avail = self.head_end - self.head_pos;
            if avail == 0 {
                self.sync_head();
                if !self.advance_or_fill()? {
                    return Err(Error::Underrun {
                        requested: total,
                        available: off as u64,
                    });
                }
                continue;
            }
            let n = avail.min(total - off);
            self.head_mem
                .as_ref()
                .expect("cached head")
                .read_into(self.head_pos, &mut dst[off..off + n]);
            self.head_pos += n;
            off += n;
        }
        Ok(())
    }

    /// Fill as much of `dst` as the input provides. Returns the byte count
    /// moved — a short count is a normal outcome, not an error.
    pub fn read_available(&mut self, dst: &mut [u8]) -> Result<usize> {
        let total = dst.len();
        let mut off = 0;
        while off < total {
            let avail = self.head_end - self.head_pos;
            if avail == 0 {
                self.sync_head();
                if !self.advance_or_fill()? {
                    break;
                }
                continue;
            }
            let n = avail.min(total - off);
            self.head_mem
                .as_ref()
                .expect("cached head")
                .read_into(self.head_pos, &mut dst[off..off + n]);
            self.head_pos += n;
            off += n;
        }
        Ok(off)
    }

    // ── Chain hand-off ──────────────────────────────────────────────────

    /// Detach the current head chunk without copying, handing its bytes to
    /// another consumer. `None` when no chunk is buffered.
    pub fn steal(&mut self) -> Option<Box<Chunk>> {
        self.sync_head();
        let mut old = self.head.take()?;
        let next = old.clean_next();
        if let Some(n) = next.as_deref() {
            self.tail_remaining -= n.read_remaining() as u64;
        }
        self.head = next;
        self.recache();
        Some(old)
    }

    /// Detach the whole remaining chain without copying.
    pub fn steal_all(&mut self) -> Option<Box<Chunk>> {
        self.sync_head();
        let head = self.head.take();
        self.tail_remaining = 0;
        self.recache();
        head
    }

    /// Release every remaining chunk and close the source.
    pub fn close(&mut self) {
        let head = self.steal_all();
        release_chain(head, &self.pool);
        self.no_more_chunks = true;
        self.source.close_source();
    }
}

macro_rules! reader_primitives {
    ($($name:ident: $ty:ty, $width:expr, $chunk_read:ident;)*) => {
        impl<S: Source> Reader<S> {
            $(
                pub fn $name(&mut self) -> Result<$ty> {
                    match self.prepare_read($width)? {
                        Some(chunk) => {
                            let v = chunk.$chunk_read()?;
                            self.complete_read();
                            Ok(v)
                        }
                        None => Err(Error::Underrun {
                            requested: $width,
                            available: self.remaining(),
                        }),
                    }
                }
            )*
        }
    };
}

reader_primitives! {
    read_u16: u16, 2, read_u16;
    read_u32: u32, 4, read_u32;
    read_u64: u64, 8, read_u64;
    read_i16: i16, 2, read_i16;
    read_i32: i32, 4, read_i32;
    read_i64: i64, 8, read_i64;
    read_f32: f32, 4, read_f32;
    read_f64: f64, 8, read_f64;
}

impl<S: Source> Drop for Reader<S> {
    fn drop(&mut self) {
        release_chain(self.head.take(), &self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::output::PacketBuilder;

    fn pool() -> Arc<ChunkPool> {
        Arc::new(ChunkPool::new(PoolConfig {
            chunk_size: 32,
            ..PoolConfig::default()
        }))
    }

    /// Source that serves a byte string in fixed-size pieces.
    struct SliceSource {
        data: Vec<u8>,
        at: usize,
        step: usize,
        closed: bool,
    }

    impl SliceSource {
        fn new(data: &[u8], step: usize) -> SliceSource {
            SliceSource {
                data: data.to_vec(),
                at: 0,
                step,
                closed: false,
            }
        }
    }

    impl Source for SliceSource {
        fn fill(&mut self, dst: &mut Chunk) -> io::Result<bool> {
            if self.at >= self.data.len() {
                return Ok(false);
            }
            let end = (self.at + self.step).min(self.data.len());
            let n = dst.append_slice(&self.data[self.at..end]);
            self.at += n;
            Ok(n > 0)
        }

        fn close_source(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn read_from_source_in_pieces() {
        let pool = pool();
        let mut r = Reader::new(SliceSource::new(b"hello from a device", 7), Arc::clone(&pool));
        let mut out = vec![0u8; 19];
        r.read_bytes(&mut out).unwrap();
        assert_eq!(&out, b"hello from a device");
        assert!(matches!(r.read_u8(), Err(Error::Underrun { .. })));
        assert!(r.at_end());
    }

    #[test]
    fn close_closes_source_and_releases_chunks() {
        let pool = pool();
        let mut r = Reader::new(SliceSource::new(b"abcdef", 6), Arc::clone(&pool));
        assert_eq!(r.read_u8().unwrap(), b'a');
        r.close();
        assert!(r.source.closed);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn primitive_straddling_source_chunks() {
        let pool = pool();
        // One byte per fill: every multi-byte read crosses a boundary and
        // exercises the merge path.
        let mut r = Reader::new(
            SliceSource::new(&0xdead_beef_u32.to_be_bytes(), 1),
            Arc::clone(&pool),
        );
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert!(r.at_end());
    }

    #[test]
    fn discard_crosses_chunks_and_reports_count() {
        let pool = pool();
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_bytes(&[7u8; 100]);
        let mut p = b.build();
        assert!(p.head.as_deref().unwrap().chain_len() > 1);

        assert_eq!(p.discard(64).unwrap(), 64);
        assert_eq!(p.remaining(), 36);
        // Over-asking is a normal short count.
        assert_eq!(p.discard(1000).unwrap(), 36);
        assert!(matches!(
            p.discard_exact(1),
            Err(Error::Underrun { .. })
        ));
    }

    #[test]
    fn rewind_within_head() {
        let pool = pool();
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_bytes(b"abcdef");
        let mut p = b.build();
        assert_eq!(p.read_u8().unwrap(), b'a');
        assert_eq!(p.read_u8().unwrap(), b'b');
        p.rewind(1).unwrap();
        assert_eq!(p.read_u8().unwrap(), b'b');
        assert!(matches!(p.rewind(10), Err(Error::Rewind { .. })));
    }

    #[test]
    fn try_peek_does_not_consume() {
        let pool = pool();
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_u8(42);
        let mut p = b.build();
        assert_eq!(p.try_peek().unwrap(), Some(42));
        assert_eq!(p.try_peek().unwrap(), Some(42));
        assert_eq!(p.read_u8().unwrap(), 42);
        assert_eq!(p.try_peek().unwrap(), None);
    }

    #[test]
    fn prepare_read_merges_across_linked_chunks() {
        let pool = pool();
        // Build two separate packets and link them without copying, so a
        // u32 written at the seam straddles the chunk boundary.
        let mut left = PacketBuilder::new(Arc::clone(&pool));
        left.write_bytes(&[1u8; 23]);
        left.write_u8(0xde);
        left.write_u8(0xad);
        let mut right = PacketBuilder::new(Arc::clone(&pool));
        right.write_u8(0xbe);
        right.write_u8(0xef);
        right.write_bytes(&[2u8; 20]);

        let mut joined = PacketBuilder::new(Arc::clone(&pool));
        let left_packet = left.build();
        let right_packet = right.build();
        joined.write_packet(left_packet);
        joined.write_packet(right_packet);
        let mut p = joined.build();

        p.discard_exact(23).unwrap();
        assert_eq!(p.read_u32().unwrap(), 0xdead_beef);
        let mut rest = vec![0u8; 20];
        p.read_bytes(&mut rest).unwrap();
        assert_eq!(rest, vec![2u8; 20]);
    }

    #[test]
    fn steal_all_hands_off_without_copying() {
        let pool = pool();
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_bytes(b"zero copy hand-off");
        let mut p = b.build();

        let chain = p.steal_all().unwrap();
        assert_eq!(p.remaining(), 0);
        assert_eq!(chain.remaining_all(), 18);
        release_chain(Some(chain), &pool);
    }

    #[test]
    fn read_available_short_count_is_normal() {
        let pool = pool();
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_bytes(b"short");
        let mut p = b.build();
        let mut dst = [0u8; 16];
        assert_eq!(p.read_available(&mut dst).unwrap(), 5);
        assert_eq!(&dst[..5], b"short");
    }
}
