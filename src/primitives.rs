//! Fixed-width primitive codec over a single chunk.
//!
//! All multi-byte values are big-endian — the encoding must match
//! bit-for-bit across implementations for anything persisting packets.
//! Each accessor verifies the requested width against the *current* chunk;
//! callers avoid cross-chunk splits by preparing a chunk with enough
//! contiguous bytes first (writers reserve [`RESERVED_SIZE`] of end-gap
//! headroom per chunk, readers merge across the boundary on demand).
//!
//! [`RESERVED_SIZE`]: crate::chunk::RESERVED_SIZE

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::memory::Memory;

macro_rules! chunk_primitives {
    ($($read:ident / $write:ident: $ty:ty, $width:expr, $load:ident, $store:ident;)*) => {
        impl Chunk {
            $(
                pub fn $read(&mut self) -> Result<$ty> {
                    if self.read_remaining() < $width {
                        return Err(Error::Underrun {
                            requested: $width,
                            available: self.read_remaining() as u64,
                        });
                    }
                    let v = self.memory().$load(self.read_pos());
                    self.discard($width).expect("width checked above");
                    Ok(v)
                }

                pub fn $write(&mut self, v: $ty) -> Result<()> {
                    if self.write_remaining() < $width {
                        return Err(Error::InsufficientSpace {
                            requested: $width,
                            available: self.write_remaining(),
                        });
                    }
                    self.memory().$store(self.write_pos(), v);
                    self.commit_written($width).expect("width checked above");
                    Ok(())
                }
            )*
        }
    };
}

chunk_primitives! {
    read_u16 / write_u16: u16, 2, load_u16, store_u16;
    read_u32 / write_u32: u32, 4, load_u32, store_u32;
    read_u64 / write_u64: u64, 8, load_u64, store_u64;
    read_i16 / write_i16: i16, 2, load_i16, store_i16;
    read_i32 / write_i32: i32, 4, load_i32, store_i32;
    read_i64 / write_i64: i64, 8, load_i64, store_i64;
    read_f32 / write_f32: f32, 4, load_f32, store_f32;
    read_f64 / write_f64: f64, 8, load_f64, store_f64;
}

impl Chunk {
    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }
}

/// Encode `c` as UTF-8 at `memory[at..]` and return the encoded width.
///
/// Branches on the scalar range: 1 byte up to 0x7F, 2 bytes up to 0x7FF,
/// 3 bytes up to 0xFFFF, 4 bytes beyond. Callers guarantee at least
/// [`utf8_width`] bytes of room.
pub(crate) fn put_utf8_char(memory: &Memory, at: usize, c: char) -> usize {
    let v = c as u32;
    if v <= 0x7f {
        memory.store_u8(at, v as u8);
        1
    } else if v <= 0x7ff {
        memory.store_u8(at, 0xc0 | ((v >> 6) & 0x1f) as u8);
        memory.store_u8(at + 1, 0x80 | (v & 0x3f) as u8);
        2
    } else if v <= 0xffff {
        memory.store_u8(at, 0xe0 | ((v >> 12) & 0x0f) as u8);
        memory.store_u8(at + 1, 0x80 | ((v >> 6) & 0x3f) as u8);
        memory.store_u8(at + 2, 0x80 | (v & 0x3f) as u8);
        3
    } else {
        memory.store_u8(at, 0xf0 | ((v >> 18) & 0x07) as u8);
        memory.store_u8(at + 1, 0x80 | ((v >> 12) & 0x3f) as u8);
        memory.store_u8(at + 2, 0x80 | ((v >> 6) & 0x3f) as u8);
        memory.store_u8(at + 3, 0x80 | (v & 0x3f) as u8);
        4
    }
}

/// Encoded UTF-8 width of `c`.
pub(crate) fn utf8_width(c: char) -> usize {
    match c as u32 {
        0..=0x7f => 1,
        0x80..=0x7ff => 2,
        0x800..=0xffff => 3,
        _ => 4,
    }
}
