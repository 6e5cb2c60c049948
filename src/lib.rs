//! bytechain — chunked byte-packet construction and consumption.
//!
//! A producer appends primitives, byte runs, strings and whole sub-packets
//! into a growing chain of pooled, fixed-size chunks without repeated
//! copying; a consumer reads the finalized chain back as an ordered byte
//! stream. Chunk memory is recycled through a bounded [`ChunkPool`] instead
//! of being allocated per packet, and concatenating packets goes through a
//! splice merger that bounds how many bytes are ever copied.
//!
//! All fixed-width values are big-endian.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytechain::{ChunkPool, PacketBuilder, PoolConfig};
//!
//! let pool = Arc::new(ChunkPool::new(PoolConfig::default()));
//!
//! let mut builder = PacketBuilder::new(Arc::clone(&pool));
//! builder.write_u32(0xcafe_f00d);
//! builder.write_str("hello");
//!
//! let mut packet = builder.build();
//! assert_eq!(packet.remaining(), 9);
//! assert_eq!(packet.read_u32().unwrap(), 0xcafe_f00d);
//! let mut text = [0u8; 5];
//! packet.read_bytes(&mut text).unwrap();
//! assert_eq!(&text, b"hello");
//! ```
//!
//! # Model
//!
//! - [`Memory`] — a flat, bounds-checked region shared between views.
//! - [`Chunk`] — a cursor-tracked view over one region, linkable into
//!   chains.
//! - [`ChunkPool`] — a bounded recycler of chunk memory.
//! - [`PacketBuilder`] / [`StreamWriter`] — chain-building writers.
//! - [`Packet`] / [`Reader`] — chain-consuming readers.
//!
//! This crate defines no wire format of its own; protocol layers assemble
//! and parse their formats on top of it. Concrete devices plug in through
//! the [`Source`] and [`Sink`] hooks.

pub(crate) mod chain;
pub(crate) mod chunk;
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod input;
pub(crate) mod memory;
pub mod metrics;
pub(crate) mod output;
pub(crate) mod packet;
pub(crate) mod pool;
pub(crate) mod primitives;

// ── Re-exports: Core types ──────────────────────────────────────────────

/// A cursor-tracked view over one memory region.
pub use chunk::Chunk;
/// End-gap headroom reserved in every chain chunk.
pub use chunk::RESERVED_SIZE;
/// Pool and splice configuration.
pub use config::PoolConfig;
/// Errors returned by cursor operations, readers and writers.
pub use error::Error;
/// Crate-wide result alias.
pub use error::Result;
/// A flat, bounds-checked, fixed-size byte region.
pub use memory::Memory;
/// Bounded recycler of chunk memory.
pub use pool::ChunkPool;

// ── Re-exports: Writing ─────────────────────────────────────────────────

/// Accumulates writes into a chain and finalizes immutable packets.
pub use output::PacketBuilder;
/// Hook for draining finished chunks to a device.
pub use output::Sink;
/// Chain-building writer that drains to a [`Sink`].
pub use output::StreamWriter;

// ── Re-exports: Reading ─────────────────────────────────────────────────

/// The source of a pure in-memory chain: never produces more bytes.
pub use input::NoSource;
/// Sequential reader over a chunk chain, optionally refillable.
pub use input::Reader;
/// Hook for pulling more bytes from a device.
pub use input::Source;
/// An immutable, one-shot-readable finalized chain.
pub use packet::Packet;
