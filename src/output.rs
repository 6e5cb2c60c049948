//! Chain-building writers: the packet builder and the sink-backed stream
//! writer.
//!
//! A [`PacketBuilder`] accumulates a chain of pooled chunks. The hot path
//! (`write_u8`) compares cached tail cursors and stores directly into the
//! tail's memory — no chunk indirection; the cached write position is
//! reconciled into the tail chunk whenever the chain is inspected, linked
//! or handed off. `build()` detaches the chain as an immutable
//! [`Packet`] and resets the builder for reuse.
//!
//! Appending one packet to another goes through the splice merger
//! (`write_packet`): rather than always linking — which is O(1) but lets
//! chains accumulate small fragments that hurt read locality forever — it
//! may copy a bounded amount now (at most `max_copy_size` bytes) to keep
//! the chain short. See [`PacketBuilder::write_packet`].

use std::io;
use std::sync::Arc;

use crate::chain::{find_tail_mut, release_chain};
use crate::chunk::{Chunk, RESERVED_SIZE};
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::metrics;
use crate::packet::Packet;
use crate::pool::ChunkPool;
use crate::primitives;

/// Accumulates writes into a chain of pooled chunks and finalizes them
/// into immutable packets.
pub struct PacketBuilder {
    head: Option<Box<Chunk>>,
    /// Last chunk of the chain. Null while the chain is empty.
    tail: *mut Chunk,
    // Cached tail cursors: the write position lives here between calls and
    // is committed back into the tail chunk by `sync_tail`.
    tail_mem: Option<Memory>,
    tail_pos: usize,
    tail_end: usize,
    tail_initial: usize,
    /// Committed bytes in chunks before the tail.
    chained_size: u64,
    pool: Arc<ChunkPool>,
}

// Safety: `tail` points into the Box chain owned by `head`; it never
// outlives it and is only dereferenced through `&mut self`.
unsafe impl Send for PacketBuilder {}

impl PacketBuilder {
    pub fn new(pool: Arc<ChunkPool>) -> PacketBuilder {
        PacketBuilder {
            head: None,
            tail: std::ptr::null_mut(),
            tail_mem: None,
            tail_pos: 0,
            tail_end: 0,
            tail_initial: 0,
            chained_size: 0,
            pool,
        }
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ChunkPool> {
        &self.pool
    }

    /// Bytes written since creation or the last [`build`](Self::build) /
    /// [`release`](Self::release).
    #[inline]
    pub fn size(&self) -> u64 {
        self.chained_size + (self.tail_pos - self.tail_initial) as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // ── Cached-cursor reconciliation ────────────────────────────────────

    /// Commit the cached write position into the tail chunk.
    fn sync_tail(&mut self) {
        if self.head.is_some() {
            // Safety: head is non-empty, so tail points at its last node.
            let t = unsafe { &mut *self.tail };
            t.commit_written_to(self.tail_pos);
        }
    }

    /// Refresh the cached cursors from the chunk `tail` points at.
    fn cache_tail(&mut self) {
        // Safety: callers set `tail` to a live node of the chain first.
        let t = unsafe { &mut *self.tail };
        self.tail_mem = Some(t.memory_handle());
        self.tail_pos = t.write_pos();
        self.tail_initial = t.read_pos();
        self.tail_end = t.limit();
    }

    /// Link `chunk` as the new tail, folding the previous tail's written
    /// length into the chained total.
    fn push_tail(&mut self, chunk: Box<Chunk>) {
        debug_assert!(chunk.next().is_none(), "tail must be a single chunk");
        if self.head.is_none() {
            self.head = Some(chunk);
            self.chained_size = 0;
            self.tail = self.head.as_deref_mut().expect("just set") as *mut Chunk;
        } else {
            // Safety: head is non-empty, so tail points at its last node.
            let old = unsafe { &mut *self.tail };
            old.commit_written_to(self.tail_pos);
            self.chained_size += (self.tail_pos - self.tail_initial) as u64;
            old.append_next(chunk);
            self.tail = old.next.as_deref_mut().expect("just appended") as *mut Chunk;
        }
        self.cache_tail();
    }

    /// Borrow a chunk, reserve the end-gap headroom and make it the tail.
    fn append_new_chunk(&mut self) {
        let mut chunk = self.pool.borrow();
        chunk
            .reserve_end_gap(RESERVED_SIZE)
            .expect("pool chunks exceed the reserve");
        self.push_tail(Box::new(chunk));
    }

    /// Adopt a whole foreign chain as the builder's content.
    fn adopt_chain(&mut self, chain: Box<Chunk>) {
        debug_assert!(self.head.is_none());
        self.head = Some(chain);
        self.refresh_chain_state();
    }

    /// Recompute the tail pointer, cached cursors and chained size after
    /// chain surgery.
    fn refresh_chain_state(&mut self) {
        let head = self.head.as_deref_mut().expect("chain is non-empty");
        let total = head.remaining_all();
        self.tail = find_tail_mut(head) as *mut Chunk;
        self.cache_tail();
        self.chained_size = total - (self.tail_pos - self.tail_initial) as u64;
    }

    // ── Write surface ───────────────────────────────────────────────────

    pub fn write_u8(&mut self, v: u8) {
        if self.tail_pos < self.tail_end {
            self.tail_mem
                .as_ref()
                .expect("cached tail")
                .store_u8(self.tail_pos, v);
            self.tail_pos += 1;
            return;
        }
        self.write_u8_slow(v);
    }

    fn write_u8_slow(&mut self, v: u8) {
        self.append_new_chunk();
        self.tail_mem
            .as_ref()
            .expect("fresh tail")
            .store_u8(self.tail_pos, v);
        self.tail_pos += 1;
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    /// Run `f` against the tail's memory with `width` contiguous writable
    /// bytes guaranteed, then account for them.
    fn write_exact(&mut self, width: usize, f: impl FnOnce(&Memory, usize)) {
        debug_assert!(width <= RESERVED_SIZE);
        if self.tail_end - self.tail_pos < width {
            self.append_new_chunk();
        }
        f(self.tail_mem.as_ref().expect("tail prepared"), self.tail_pos);
        self.tail_pos += width;
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        let mut off = 0;
        while off < src.len() {
            let room = self.tail_end - self.tail_pos;
            if room == 0 {
                self.append_new_chunk();
                continue;
            }
            let n = room.min(src.len() - off);
            self.tail_mem
                .as_ref()
                .expect("tail has room")
                .write_from(self.tail_pos, &src[off..off + n]);
            self.tail_pos += n;
            off += n;
        }
    }

    /// Append the UTF-8 bytes of `s`.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Append one UTF-8 encoded scalar (1–4 bytes).
    pub fn write_char(&mut self, c: char) {
        let width = primitives::utf8_width(c);
        self.write_exact(width, |m, at| {
            primitives::put_utf8_char(m, at, c);
        });
    }

    /// Drain any [`bytes::Buf`] into the builder.
    pub fn write_buf(&mut self, buf: &mut impl bytes::Buf) {
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let n = chunk.len();
            self.write_bytes(chunk);
            buf.advance(n);
        }
    }

    // ── Packet splicing ─────────────────────────────────────────────────

    /// Append a whole packet, consuming it.
    ///
    /// The packet's chain is stolen, never copied wholesale. Joining it to
    /// a non-empty builder picks one of three strategies per merge:
    ///
    /// - **link** the chains — no copy, but the chain grows;
    /// - **append** — copy the foreign head's bytes into the tail's free
    ///   space and end gap, dropping the foreign head;
    /// - **prepend** — copy the tail's bytes into the foreign head's start
    ///   gap, replacing the tail.
    ///
    /// A copy strategy is only eligible when the copied fragment is
    /// smaller than the pool's `max_copy_size` and fits the available gap
    /// (prepend additionally requires the foreign head to be exclusively
    /// owned — copying into shared memory would corrupt other views).
    /// When both are eligible the smaller copy wins, ties favor append.
    /// This bounds copy cost per merge while keeping chains from growing
    /// without bound under repeated small appends.
    pub fn write_packet(&mut self, mut p: Packet) {
        let foreign_pool = Arc::clone(p.pool());
        let Some(foreign) = p.steal_all() else {
            return;
        };
        if self.head.is_none() {
            self.adopt_chain(foreign);
            return;
        }
        self.splice_chain(foreign, &foreign_pool);
    }

    fn splice_chain(&mut self, mut foreign: Box<Chunk>, foreign_pool: &ChunkPool) {
        self.sync_tail();
        let max_copy = self.pool.config().max_copy_size;
        // Safety: head is non-empty, so tail points at its last node.
        let tail = unsafe { &mut *self.tail };
        let last_size = tail.read_remaining();
        let next_size = foreign.read_remaining();

        let append_ok =
            next_size < max_copy && next_size <= tail.write_remaining() + tail.end_gap();
        let prepend_ok = last_size < max_copy
            && last_size <= foreign.start_gap()
            && foreign.exclusively_owned();

        if !append_ok && !prepend_ok {
            metrics::SPLICE_LINK.increment();
            debug_assert!(tail.next().is_none());
            tail.next = Some(foreign);
        } else if !prepend_ok || (append_ok && next_size <= last_size) {
            metrics::SPLICE_APPEND.increment();
            let room = tail.write_remaining() + tail.end_gap();
            let copied = tail.append_from(&mut foreign, room);
            debug_assert_eq!(copied, next_size);
            if let Some(rest) = foreign.clean_next() {
                tail.next = Some(rest);
            }
            (*foreign).release(foreign_pool);
        } else {
            metrics::SPLICE_PREPEND.increment();
            let mut old_tail = self.detach_tail();
            foreign.prepend_from(&mut old_tail);
            (*old_tail).release(&self.pool);
            self.attach_chain(foreign);
        }
        self.refresh_chain_state();
    }

    /// Remove and return the tail chunk, leaving the rest of the chain in
    /// place.
    fn detach_tail(&mut self) -> Box<Chunk> {
        let tail_ptr = self.tail as *const Chunk;
        let head = self.head.as_deref_mut().expect("chain is non-empty");
        if std::ptr::eq(head as *const Chunk, tail_ptr) {
            return self.head.take().expect("checked above");
        }
        let mut cur: &mut Chunk = head;
        loop {
            let next_is_tail = {
                let next = cur.next().expect("tail is reachable from head");
                std::ptr::eq(next as *const Chunk, tail_ptr)
            };
            if next_is_tail {
                return cur.clean_next().expect("checked above");
            }
            cur = cur.next.as_deref_mut().expect("tail is reachable from head");
        }
    }

    /// Link `chain` (which may carry successors) at the end of the
    /// builder's chain.
    fn attach_chain(&mut self, chain: Box<Chunk>) {
        match self.head.as_deref_mut() {
            None => self.head = Some(chain),
            Some(head) => {
                let last = find_tail_mut(head);
                debug_assert!(last.next().is_none());
                last.next = Some(chain);
            }
        }
    }

    /// Move exactly `n` bytes from the front of `p` into the builder:
    /// whole head chunks are stolen while they fit, the final partial
    /// chunk is copied.
    pub fn write_packet_n(&mut self, p: &mut Packet, n: u64) -> Result<()> {
        let mut left = n;
        while left > 0 {
            let head_remaining = p.head_remaining() as u64;
            if head_remaining <= left {
                match p.steal() {
                    Some(chunk) => {
                        left -= head_remaining;
                        self.push_tail(chunk);
                    }
                    None => {
                        return Err(Error::Underrun {
                            requested: n as usize,
                            available: n - left,
                        });
                    }
                }
            } else {
                let take = left as usize;
                let chunk = p.prepare_read(1)?.expect("head has remaining bytes");
                let piece = &chunk.readable()[..take];
                self.write_bytes(piece);
                chunk.discard(take).expect("bounded by readable bytes");
                p.complete_read();
                left = 0;
            }
        }
        Ok(())
    }

    // ── Finalization ────────────────────────────────────────────────────

    /// Detach the accumulated chain and cached state, resetting the
    /// builder to empty.
    pub(crate) fn steal_all(&mut self) -> Option<Box<Chunk>> {
        self.sync_tail();
        self.tail = std::ptr::null_mut();
        self.tail_mem = None;
        self.tail_pos = 0;
        self.tail_end = 0;
        self.tail_initial = 0;
        self.chained_size = 0;
        self.head.take()
    }

    /// Finalize the accumulated bytes as an immutable [`Packet`] and reset
    /// the builder for the next packet.
    pub fn build(&mut self) -> Packet {
        let size = self.size();
        let head = self.steal_all();
        Packet::from_chain(head, size, Arc::clone(&self.pool))
    }

    /// Inspect the bytes written so far as a temporary packet without
    /// disturbing the builder. The view duplicates chunk handles, not
    /// bytes, and is released when `f` returns.
    pub fn preview<R>(&mut self, f: impl FnOnce(&mut Packet) -> R) -> R {
        self.sync_tail();
        let head = self.head.as_deref().map(crate::chain::copy_chain);
        let mut packet = Packet::from_chain(head, self.size(), Arc::clone(&self.pool));
        f(&mut packet)
    }

    /// Discard everything written so far, returning the chunks to the
    /// pool. The builder is reusable afterwards.
    pub fn release(&mut self) {
        let head = self.steal_all();
        release_chain(head, &self.pool);
    }

    /// Abandon the builder early. For a memory-backed builder this is the
    /// same as [`release`](Self::release); there is no destination to
    /// close.
    pub fn close(&mut self) {
        self.release();
    }
}

impl Drop for PacketBuilder {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PacketBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuilder")
            .field("size", &self.size())
            .finish()
    }
}

/// Hook for draining finished chunks to a device.
pub trait Sink {
    /// Write out the readable bytes of `chunk`. The chunk is released as
    /// soon as this returns; implementations must not retain references
    /// into it.
    fn flush(&mut self, chunk: &mut Chunk) -> io::Result<()>;

    /// Close the destination. Called once by [`StreamWriter::close`] after
    /// the final flush.
    fn close_destination(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer that accumulates into a chain like a [`PacketBuilder`] but
/// drains to a [`Sink`] on [`flush`](StreamWriter::flush) instead of
/// finalizing packets.
pub struct StreamWriter<K: Sink> {
    out: PacketBuilder,
    sink: K,
}

impl<K: Sink> StreamWriter<K> {
    pub fn new(sink: K, pool: Arc<ChunkPool>) -> StreamWriter<K> {
        StreamWriter {
            out: PacketBuilder::new(pool),
            sink,
        }
    }

    /// Bytes buffered and not yet flushed.
    pub fn pending(&self) -> u64 {
        self.out.size()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.out.write_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.out.write_i8(v);
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        self.out.write_bytes(src);
    }

    pub fn write_str(&mut self, s: &str) {
        self.out.write_str(s);
    }

    pub fn write_char(&mut self, c: char) {
        self.out.write_char(c);
    }

    pub fn write_buf(&mut self, buf: &mut impl bytes::Buf) {
        self.out.write_buf(buf);
    }

    /// Append a whole packet chunk by chunk, consuming it. Streaming
    /// output links chains as-is; splicing is a packet-builder concern.
    pub fn write_packet(&mut self, mut p: Packet) {
        while let Some(chunk) = p.steal() {
            self.out.push_tail(chunk);
        }
    }

    /// Write every buffered chunk, in order, to the sink, then return the
    /// chunks to the pool. All chunks are released even when the sink
    /// fails part-way; the first failure is returned.
    pub fn flush(&mut self) -> io::Result<()> {
        let mut cur = self.out.steal_all();
        let mut result = Ok(());
        while let Some(mut chunk) = cur {
            cur = chunk.clean_next();
            if result.is_ok() {
                result = self.sink.flush(&mut chunk);
            }
            (*chunk).release(self.out.pool());
        }
        result
    }

    /// Flush buffered chunks and close the destination. The destination
    /// is closed even if flushing failed; the flush failure wins.
    pub fn close(mut self) -> io::Result<()> {
        let flushed = self.flush();
        let closed = self.sink.close_destination();
        flushed?;
        closed
    }
}

macro_rules! writer_primitives {
    ($($name:ident: $ty:ty, $width:expr, $store:ident;)*) => {
        impl PacketBuilder {
            $(
                /// Write a big-endian fixed-width value.
                pub fn $name(&mut self, v: $ty) {
                    self.write_exact($width, |m, at| m.$store(at, v));
                }
            )*
        }

        impl<K: Sink> StreamWriter<K> {
            $(
                /// Write a big-endian fixed-width value.
                pub fn $name(&mut self, v: $ty) {
                    self.out.$name(v);
                }
            )*
        }
    };
}

writer_primitives! {
    write_u16: u16, 2, store_u16;
    write_u32: u32, 4, store_u32;
    write_u64: u64, 8, store_u64;
    write_i16: i16, 2, store_i16;
    write_i32: i32, 4, store_i32;
    write_i64: i64, 8, store_i64;
    write_f32: f32, 4, store_f32;
    write_f64: f64, 8, store_f64;
}
