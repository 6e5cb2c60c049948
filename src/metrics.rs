//! Pool and splice counters.
//!
//! Registered with [`metriken`] so embedding applications can expose them
//! alongside their own metrics. Counters only — a buffer hot path must not
//! log.

use metriken::{metric, Counter};

#[metric(
    name = "bytechain/pool/borrowed",
    description = "Chunks handed out by pools"
)]
pub static POOL_BORROWED: Counter = Counter::new();

#[metric(
    name = "bytechain/pool/recycled",
    description = "Chunk regions returned to a pool free list"
)]
pub static POOL_RECYCLED: Counter = Counter::new();

#[metric(
    name = "bytechain/pool/allocated",
    description = "Fresh chunk regions allocated on an empty free list"
)]
pub static POOL_ALLOCATED: Counter = Counter::new();

#[metric(
    name = "bytechain/pool/dropped",
    description = "Released regions dropped because the free list was full"
)]
pub static POOL_DROPPED: Counter = Counter::new();

#[metric(
    name = "bytechain/splice/append",
    description = "Packet concatenations resolved by copying the foreign head forward"
)]
pub static SPLICE_APPEND: Counter = Counter::new();

#[metric(
    name = "bytechain/splice/prepend",
    description = "Packet concatenations resolved by copying the tail into the foreign head"
)]
pub static SPLICE_PREPEND: Counter = Counter::new();

#[metric(
    name = "bytechain/splice/link",
    description = "Packet concatenations resolved by linking chains without copying"
)]
pub static SPLICE_LINK: Counter = Counter::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = POOL_BORROWED.value();
        POOL_BORROWED.increment();
        assert!(POOL_BORROWED.value() > before);
    }
}
