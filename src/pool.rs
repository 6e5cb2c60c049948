//! Bounded recycler of chunk memory.
//!
//! The pool hands out reset, exclusively-owned chunks and reclaims regions
//! whose share count has dropped to zero. The free list is bounded: beyond
//! capacity, released regions are dropped rather than queued, so the pool
//! never retains more than `capacity * chunk_size` bytes.
//!
//! Borrow and recycle are safe to call from multiple threads; ownership of
//! each region transfers atomically through the share count.

use std::sync::Mutex;

use crate::chunk::Chunk;
use crate::config::PoolConfig;
use crate::memory::Memory;
use crate::metrics;

/// Bounded pool of fixed-size chunk memory.
///
/// Writers and readers take an explicit pool handle (`Arc<ChunkPool>`);
/// there is no ambient global pool.
pub struct ChunkPool {
    free: Mutex<Vec<Memory>>,
    config: PoolConfig,
}

impl ChunkPool {
    /// Create a pool for the given configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid (see
    /// [`PoolConfig::validate`]); a bad configuration is a programming
    /// error, not a runtime condition.
    pub fn new(config: PoolConfig) -> ChunkPool {
        if let Err(reason) = config.validate() {
            panic!("invalid pool configuration: {reason}");
        }
        ChunkPool {
            free: Mutex::new(Vec::with_capacity(config.capacity.min(64))),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Capacity in bytes of chunks this pool hands out.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Borrow a reset, exclusively-owned chunk: share count 1, no
    /// successor, no gap reservations, fully writable.
    pub fn borrow(&self) -> Chunk {
        let reused = self.free.lock().expect("pool lock").pop();
        metrics::POOL_BORROWED.increment();
        match reused {
            Some(memory) => {
                memory.force_exclusive();
                Chunk::new(memory)
            }
            None => {
                metrics::POOL_ALLOCATED.increment();
                Chunk::new(Memory::alloc(self.config.chunk_size))
            }
        }
    }

    /// Return a fully released owner chunk to the pool.
    ///
    /// # Panics
    /// Panics if the chunk's share count is not zero, if it is a duplicate
    /// view, or if it still links a successor — each a bug in the calling
    /// code, not a recoverable condition.
    pub fn recycle(&self, chunk: Chunk) {
        assert_eq!(
            chunk.share_count(),
            0,
            "recycled chunk is still referenced"
        );
        assert!(!chunk.is_view(), "cannot recycle a duplicate view");
        assert!(
            chunk.next().is_none(),
            "recycled chunk still links a successor"
        );
        self.reclaim(chunk.memory_handle());
    }

    /// Push a fully released region onto the free list, or drop it when the
    /// list is at capacity. Shared terminal path for owner recycling and
    /// for the last view of a region.
    pub(crate) fn reclaim(&self, memory: Memory) {
        debug_assert_eq!(memory.share_count(), 0);
        // Only regions of the configured size are worth retaining.
        if memory.len() == self.config.chunk_size {
            let mut free = self.free.lock().expect("pool lock");
            if free.len() < self.config.capacity {
                free.push(memory);
                metrics::POOL_RECYCLED.increment();
                return;
            }
        }
        metrics::POOL_DROPPED.increment();
    }

    /// Number of regions currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.lock().expect("pool lock").len()
    }
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("free", &self.free_count())
            .field("capacity", &self.config.capacity)
            .field("chunk_size", &self.config.chunk_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn small_pool(capacity: usize) -> ChunkPool {
        ChunkPool::new(PoolConfig {
            chunk_size: 64,
            capacity,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn borrow_release_borrow_resets_state() {
        let pool = small_pool(4);
        let mut chunk = pool.borrow();
        chunk.reserve_start_gap(4).unwrap();
        chunk.reserve_end_gap(8).unwrap();
        chunk.append_slice(b"data");
        chunk.release(&pool);
        assert_eq!(pool.free_count(), 1);

        let again = pool.borrow();
        assert_eq!(again.share_count(), 1);
        assert!(again.next().is_none());
        assert_eq!(again.start_gap(), 0);
        assert_eq!(again.end_gap(), 0);
        assert_eq!(again.read_remaining(), 0);
        assert_eq!(again.write_remaining(), 64);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn over_capacity_chunks_are_dropped() {
        let pool = small_pool(1);
        let a = pool.borrow();
        let b = pool.borrow();
        a.release(&pool);
        b.release(&pool);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn recycle_while_shared_panics() {
        let pool = small_pool(4);
        let chunk = pool.borrow();
        let _view = chunk.duplicate();
        // Share count is 2; recycling now would hand out aliased memory.
        pool.recycle(chunk);
    }

    #[test]
    #[should_panic(expected = "invalid pool configuration")]
    fn invalid_config_panics() {
        let _ = ChunkPool::new(PoolConfig {
            chunk_size: 4,
            ..PoolConfig::default()
        });
    }

    #[test]
    fn concurrent_borrow_recycle() {
        let pool = Arc::new(small_pool(32));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..500u32 {
                    let mut chunk = pool.borrow();
                    assert_eq!(chunk.share_count(), 1);
                    chunk.append_slice(&i.to_be_bytes());
                    chunk.release(&pool);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.free_count() <= 32);
    }
}
