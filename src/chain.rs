//! Chain linking and the reference-counted chunk lifecycle.
//!
//! A chain is a singly linked list of chunks representing one logical
//! packet's bytes in order. A chunk is linked into at most one chain at a
//! time; linking over an existing successor is a fatal programmer error.
//!
//! Duplication shares the underlying memory region: [`Chunk::duplicate`]
//! bumps the region's share count and yields an independent-cursor view.
//! [`Chunk::release`] decrements it; whichever release reaches zero hands
//! the region back to the pool. No region re-enters the pool while a view
//! still counts it — this is the sole structural use-after-free guard.

use crate::chunk::Chunk;
use crate::pool::ChunkPool;

impl Chunk {
    /// Link `chunk` as this chunk's successor.
    ///
    /// # Panics
    /// Panics if this chunk already has a successor, or if `chunk` arrives
    /// carrying one of its own.
    pub fn append_next(&mut self, chunk: Box<Chunk>) {
        assert!(self.next.is_none(), "chunk already has a successor");
        assert!(
            chunk.next.is_none(),
            "appended chunk is already linked into a chain"
        );
        self.next = Some(chunk);
    }

    /// Detach and return this chunk's successor.
    pub fn clean_next(&mut self) -> Option<Box<Chunk>> {
        self.next.take()
    }

    #[inline]
    pub fn next(&self) -> Option<&Chunk> {
        self.next.as_deref()
    }

    /// `true` while no duplicate views share this chunk's memory.
    pub fn exclusively_owned(&self) -> bool {
        self.memory().share_count() == 1
    }

    /// Current share count of the underlying region.
    pub fn share_count(&self) -> i32 {
        self.memory().share_count()
    }

    /// `true` if this chunk is a duplicate view over another chunk's memory.
    pub fn is_view(&self) -> bool {
        self.view
    }

    /// Create an independent-cursor view over the same memory.
    ///
    /// The view starts at the same positions as this chunk; cursors diverge
    /// independently afterwards. Content is frozen by protocol while shared.
    /// The view is not linked into any chain.
    ///
    /// # Panics
    /// Panics if the region was already fully released.
    pub fn duplicate(&self) -> Chunk {
        self.memory().acquire_share();
        let mut copy = Chunk::new(self.memory_handle());
        copy.view = true;
        copy.reserve_end_gap(self.end_gap())
            .expect("source gap configuration is valid");
        copy.commit_written_to(self.write_pos());
        copy.discard_to(self.read_pos());
        copy.reserve_start_gap(self.start_gap())
            .expect("source read position is at or past its start gap");
        copy
    }

    /// Release this chunk's hold on its memory. The release that brings the
    /// share count to zero returns the region to `pool`.
    ///
    /// # Panics
    /// Panics on over-release, or if the chunk is still linked to a
    /// successor (release the chain head last, or use
    /// [`release_chain`]).
    pub fn release(self, pool: &ChunkPool) {
        assert!(
            self.next.is_none(),
            "cannot release a chunk that still links a successor"
        );
        if self.memory().release_share() == 0 {
            pool.reclaim(self.memory_handle());
        }
    }

    /// Readable bytes in this chunk and every chunk after it.
    pub fn remaining_all(&self) -> u64 {
        let mut total = 0u64;
        let mut cur = Some(self);
        while let Some(c) = cur {
            total += c.read_remaining() as u64;
            cur = c.next();
        }
        total
    }

    /// Number of chunks in the chain starting here.
    pub fn chain_len(&self) -> usize {
        let mut n = 0;
        let mut cur = Some(self);
        while let Some(c) = cur {
            n += 1;
            cur = c.next();
        }
        n
    }
}

/// Walk to the last chunk of the chain starting at `head`.
pub(crate) fn find_tail_mut(mut cur: &mut Chunk) -> &mut Chunk {
    while cur.next.is_some() {
        cur = cur.next.as_deref_mut().expect("checked above");
    }
    cur
}

/// Release every chunk of a chain, iteratively.
pub(crate) fn release_chain(head: Option<Box<Chunk>>, pool: &ChunkPool) {
    let mut cur = head;
    while let Some(mut chunk) = cur {
        cur = chunk.clean_next();
        (*chunk).release(pool);
    }
}

/// Duplicate every chunk of a chain, preserving order and links.
pub(crate) fn copy_chain(head: &Chunk) -> Box<Chunk> {
    let mut new_head = Box::new(head.duplicate());
    {
        let mut tail = &mut *new_head;
        let mut cur = head.next();
        while let Some(c) = cur {
            tail.append_next(Box::new(c.duplicate()));
            cur = c.next();
            tail = tail.next.as_deref_mut().expect("just appended");
        }
    }
    new_head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::memory::Memory;

    fn pool() -> ChunkPool {
        ChunkPool::new(PoolConfig::default())
    }

    #[test]
    fn link_and_walk() {
        let mut a = Chunk::new(Memory::alloc(32));
        a.append_slice(b"ab");
        let mut b = Chunk::new(Memory::alloc(32));
        b.append_slice(b"cde");
        let c = Chunk::new(Memory::alloc(32));

        a.append_next(Box::new(b));
        find_tail_mut(&mut a).append_next(Box::new(c));

        assert_eq!(a.chain_len(), 3);
        assert_eq!(a.remaining_all(), 5);
        assert_eq!(find_tail_mut(&mut a).read_remaining(), 0);
    }

    #[test]
    #[should_panic(expected = "already has a successor")]
    fn double_link_panics() {
        let mut a = Chunk::new(Memory::alloc(32));
        a.append_next(Box::new(Chunk::new(Memory::alloc(32))));
        a.append_next(Box::new(Chunk::new(Memory::alloc(32))));
    }

    #[test]
    fn duplicate_shares_memory_with_independent_cursors() {
        let p = pool();
        let mut owner = p.borrow();
        owner.append_slice(b"shared bytes");

        let mut dup = owner.duplicate();
        assert!(dup.is_view());
        assert_eq!(owner.share_count(), 2);
        assert_eq!(dup.readable(), b"shared bytes");

        // Cursors diverge independently.
        dup.discard(7).unwrap();
        assert_eq!(dup.readable(), b"bytes");
        assert_eq!(owner.readable(), b"shared bytes");

        dup.release(&p);
        assert_eq!(owner.share_count(), 1);
        owner.release(&p);
    }

    #[test]
    fn duplicate_preserves_gap_configuration() {
        let p = pool();
        let mut owner = p.borrow();
        owner.reserve_start_gap(4).unwrap();
        owner.reserve_end_gap(8).unwrap();
        owner.append_slice(b"xy");

        let dup = owner.duplicate();
        assert_eq!(dup.start_gap(), owner.start_gap());
        assert_eq!(dup.end_gap(), owner.end_gap());
        assert_eq!(dup.read_pos(), owner.read_pos());
        assert_eq!(dup.write_pos(), owner.write_pos());

        dup.release(&p);
        owner.release(&p);
    }

    /// Releases required to reach the pool = 1 (borrow) + duplicates.
    #[test]
    fn release_conservation() {
        let p = pool();
        let owner = p.borrow();
        assert_eq!(p.free_count(), 0);

        let v1 = owner.duplicate();
        let v2 = v1.duplicate();
        assert_eq!(owner.share_count(), 3);

        owner.release(&p);
        assert_eq!(p.free_count(), 0);
        v1.release(&p);
        assert_eq!(p.free_count(), 0);
        // Last holder — the region finally re-enters the pool.
        v2.release(&p);
        assert_eq!(p.free_count(), 1);
    }

    #[test]
    fn copy_chain_duplicates_every_link() {
        let p = pool();
        let mut a = p.borrow();
        a.append_slice(b"one");
        let mut b = p.borrow();
        b.append_slice(b"two");
        a.append_next(Box::new(b));

        let dup = copy_chain(&a);
        assert_eq!(dup.chain_len(), 2);
        assert_eq!(dup.remaining_all(), 6);
        assert_eq!(a.share_count(), 2);

        release_chain(Some(dup), &p);
        assert_eq!(a.share_count(), 1);
        release_chain(Some(Box::new(a)), &p);
        assert_eq!(p.free_count(), 2);
    }
}
