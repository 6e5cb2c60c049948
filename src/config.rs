use crate::chunk::RESERVED_SIZE;

/// Configuration for a [`ChunkPool`](crate::ChunkPool) and the writers and
/// readers built on top of it.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Capacity in bytes of each pooled chunk.
    ///
    /// Must be at least `2 * RESERVED_SIZE` (16) so a chunk still has usable
    /// room after the per-chunk end gap reservation.
    /// Default: 4096.
    pub chunk_size: usize,
    /// Maximum number of released chunks retained on the free list.
    /// Chunks released beyond this bound are dropped instead of queued.
    /// Default: 100.
    pub capacity: usize,
    /// Splice copy threshold in bytes. When concatenating packets, a head or
    /// tail fragment strictly smaller than this may be copied to keep chains
    /// short; fragments at or above it are always linked.
    /// Default: 500.
    pub max_copy_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            chunk_size: 4096,
            capacity: 100,
            max_copy_size: 500,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration. Returns a description of the first
    /// problem found, if any.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.chunk_size < 2 * RESERVED_SIZE {
            return Err(format!(
                "chunk_size {} is too small: must be at least {}",
                self.chunk_size,
                2 * RESERVED_SIZE
            ));
        }
        if self.max_copy_size == 0 {
            return Err("max_copy_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn tiny_chunks_rejected() {
        let config = PoolConfig {
            chunk_size: 8,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_copy_threshold_rejected() {
        let config = PoolConfig {
            max_copy_size: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
