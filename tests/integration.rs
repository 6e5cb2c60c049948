//! Lifecycle and adapter integration tests: pool reuse across writers and
//! readers, source/sink hooks, and the `bytes` interop surface.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytechain::{
    Chunk, ChunkPool, Error, Packet, PacketBuilder, PoolConfig, Reader, Sink, Source,
    StreamWriter,
};

fn pool_with(capacity: usize) -> Arc<ChunkPool> {
    Arc::new(ChunkPool::new(PoolConfig {
        chunk_size: 64,
        capacity,
        max_copy_size: 500,
    }))
}

#[test]
fn chunks_cycle_between_builder_and_reader() {
    let pool = pool_with(8);

    for _ in 0..10 {
        let mut b = PacketBuilder::new(Arc::clone(&pool));
        b.write_bytes(&[1u8; 200]);
        let mut p = b.build();
        p.discard_exact(200).unwrap();
        // Draining released every chunk back to the pool.
        assert!(p.at_end());
    }
    // 200 bytes over 56-byte usable chunks is 4 chunks in flight at a time.
    assert_eq!(pool.free_count(), 4);
}

#[test]
fn pool_bound_is_respected_under_churn() {
    let pool = pool_with(2);
    let mut builders: Vec<PacketBuilder> = (0..6)
        .map(|_| {
            let mut b = PacketBuilder::new(Arc::clone(&pool));
            b.write_bytes(&[0u8; 60]);
            b
        })
        .collect();
    for b in &mut builders {
        b.release();
    }
    // 12 chunks released, only 2 retained.
    assert_eq!(pool.free_count(), 2);
}

/// Source feeding from a shared byte vector, flagging close.
struct CountingSource {
    data: Vec<u8>,
    at: usize,
    fills: Arc<AtomicUsize>,
}

impl Source for CountingSource {
    fn fill(&mut self, dst: &mut Chunk) -> io::Result<bool> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        if self.at >= self.data.len() {
            return Ok(false);
        }
        let end = (self.at + 10).min(self.data.len());
        let n = dst.append_slice(&self.data[self.at..end]);
        self.at += n;
        Ok(n > 0)
    }
}

#[test]
fn reader_pulls_from_source_only_on_demand() {
    let pool = pool_with(8);
    let fills = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        data: (0..40u8).collect(),
        at: 0,
        fills: Arc::clone(&fills),
    };

    let mut r = Reader::new(source, Arc::clone(&pool));
    assert_eq!(fills.load(Ordering::SeqCst), 0, "no eager fill");

    assert_eq!(r.read_u8().unwrap(), 0);
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    let mut rest = vec![0u8; 39];
    r.read_bytes(&mut rest).unwrap();
    assert!(r.read_u8().is_err());
    r.close();
}

/// Sink that records flush sizes and failures.
struct FailingSink {
    flushed_bytes: usize,
    failures_left: usize,
    closed: bool,
}

impl Sink for &mut FailingSink {
    fn flush(&mut self, chunk: &mut Chunk) -> io::Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(io::Error::other("transient device failure"));
        }
        self.flushed_bytes += chunk.read_remaining();
        Ok(())
    }

    fn close_destination(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[test]
fn stream_writer_releases_chunks_despite_sink_failure() {
    let pool = pool_with(8);
    let mut sink = FailingSink {
        flushed_bytes: 0,
        failures_left: 1,
        closed: false,
    };
    {
        let mut w = StreamWriter::new(&mut sink, Arc::clone(&pool));
        w.write_bytes(&[7u8; 150]); // three chunks
        assert!(w.flush().is_err());
        // Failure or not, every chunk went back to the pool.
        assert_eq!(pool.free_count(), 3);

        w.write_str("after recovery");
        w.close().unwrap();
    }
    assert!(sink.closed);
    assert_eq!(sink.flushed_bytes, 14);
}

#[test]
fn error_taxonomy_is_distinguishable() {
    let pool = pool_with(8);

    // Underrun: a genuinely short packet.
    let mut b = PacketBuilder::new(Arc::clone(&pool));
    b.write_u16(1);
    let mut p = b.build();
    assert!(matches!(p.read_u64(), Err(Error::Underrun { .. })));

    // Cursor misuse: rewinding bytes that were never read.
    let mut b = PacketBuilder::new(Arc::clone(&pool));
    b.write_u16(1);
    let mut p = b.build();
    assert!(matches!(p.rewind(5), Err(Error::Rewind { .. })));
}

#[test]
fn packets_interoperate_with_bytes_consumers() {
    use bytes::Buf;

    let pool = pool_with(8);
    let mut b = PacketBuilder::new(Arc::clone(&pool));
    b.write_u32(0x1122_3344);
    b.write_bytes(&[9u8; 100]);
    let p = b.build();

    // Any Buf-consuming API can drain a packet.
    let mut p: Packet = p;
    assert_eq!(Buf::remaining(&p), 104);
    assert_eq!(p.get_u32(), 0x1122_3344);
    let rest = p.copy_to_bytes(100);
    assert!(rest.iter().all(|&x| x == 9));
}

#[test]
fn builders_ingest_bytes_buffers() {
    let pool = pool_with(8);
    let mut b = PacketBuilder::new(Arc::clone(&pool));
    let mut src = bytes::Bytes::from_static(b"from the bytes crate");
    b.write_buf(&mut src);
    let mut p = b.build();
    let mut out = vec![0u8; 20];
    p.read_bytes(&mut out).unwrap();
    assert_eq!(&out, b"from the bytes crate");
}

#[test]
fn metrics_observe_pool_traffic() {
    let pool = pool_with(8);
    let borrowed_before = bytechain::metrics::POOL_BORROWED.value();
    let mut b = PacketBuilder::new(Arc::clone(&pool));
    b.write_bytes(&[0u8; 100]);
    b.release();
    assert!(bytechain::metrics::POOL_BORROWED.value() >= borrowed_before + 2);
}
