//! Finalized packets.
//!
//! A [`Packet`] is an immutable, one-shot-readable chunk chain with a fixed
//! total byte count: a [`Reader`] over a chain that will never be refilled.
//! Reading mutates the cursors of its chunks but never their shared memory,
//! so [`Packet::copy`] can hand out an independent shadow of an unread
//! packet without copying a single byte.

use std::sync::Arc;

use crate::chain::copy_chain;
use crate::chunk::Chunk;
use crate::input::{NoSource, Reader};
use crate::pool::ChunkPool;

/// An immutable, one-shot-readable finalized chain.
pub type Packet = Reader<NoSource>;

impl Packet {
    /// A packet with no bytes.
    pub fn empty(pool: Arc<ChunkPool>) -> Packet {
        Packet::from_chain(None, 0, pool)
    }

    /// Wrap a detached chain as a packet. `remaining` must equal the
    /// chain's total readable byte count.
    pub(crate) fn from_chain(
        head: Option<Box<Chunk>>,
        remaining: u64,
        pool: Arc<ChunkPool>,
    ) -> Packet {
        debug_assert_eq!(
            remaining,
            head.as_deref().map_or(0, Chunk::remaining_all),
            "declared packet size disagrees with its chain"
        );
        let mut p = Reader {
            head,
            head_mem: None,
            head_pos: 0,
            head_end: 0,
            tail_remaining: 0,
            no_more_chunks: true,
            pool,
            source: NoSource,
        };
        if let Some(h) = p.head.as_deref() {
            p.head_mem = Some(h.memory_handle());
            p.head_pos = h.read_pos();
            p.head_end = h.write_pos();
            p.tail_remaining = remaining - h.read_remaining() as u64;
        }
        p
    }

    /// Build a single-chain packet holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8], pool: Arc<ChunkPool>) -> Packet {
        let mut builder = crate::output::PacketBuilder::new(pool);
        builder.write_bytes(bytes);
        builder.build()
    }

    /// An independent shadow of this packet: same bytes, its own cursors,
    /// no byte copying. Both packets must be fully consumed or closed.
    pub fn copy(&self) -> Packet {
        match self.head.as_deref() {
            None => Packet::empty(Arc::clone(&self.pool)),
            Some(h) => {
                let mut dup = copy_chain(h);
                // Reflect consumption tracked only in the cached cursor.
                dup.discard_to(self.head_pos);
                Packet::from_chain(Some(dup), self.remaining(), Arc::clone(&self.pool))
            }
        }
    }
}

impl bytes::Buf for Packet {
    fn remaining(&self) -> usize {
        Packet::remaining(self) as usize
    }

    fn chunk(&self) -> &[u8] {
        match &self.head_mem {
            Some(m) if self.head_pos < self.head_end => m.as_slice(self.head_pos, self.head_end),
            _ => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        let moved = self
            .discard(cnt as u64)
            .expect("in-memory packets cannot fail to discard");
        assert_eq!(moved, cnt as u64, "advance past the end of the packet");
    }
}
