//! Shared helpers for integration tests.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use parking_lot::Mutex;
use pooled_bgzf::{BGZF_BLOCK_SIZE, Pipeline, PipelineBuilder, bgzf};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Build a pipeline with `threads` workers and otherwise default settings.
pub fn pipeline(threads: usize) -> Pipeline {
    PipelineBuilder::new().threads(threads).build().expect("valid pipeline config")
}

/// Line-oriented text where every line names its index, so reordering is detectable.
pub fn numbered_lines(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len + 64);
    let mut line = 0_u64;
    while data.len() < len {
        writeln!(data, "line {line:>10} ACGTTGCAACGTTGCAACGTTGCA").expect("write to Vec");
        line += 1;
    }
    data.truncate(len);
    data
}

/// Uniformly random bytes; effectively incompressible.
pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..=u8::MAX)).collect()
}

/// Compress `data` with the third-party `bgzf` crate, one member per `chunk_size` bytes.
pub fn bgzf_crate_compress(data: &[u8], chunk_size: usize, level: u8, with_eof: bool) -> Vec<u8> {
    assert!(chunk_size <= BGZF_BLOCK_SIZE);
    let mut compressor = ::bgzf::Compressor::new(::bgzf::CompressionLevel::new(level).expect("valid level"));
    let mut out = Vec::new();
    for chunk in data.chunks(chunk_size) {
        let mut member = Vec::new();
        compressor.compress(chunk, &mut member).expect("bgzf crate compresses chunk");
        out.extend_from_slice(&member);
    }
    if with_eof {
        let mut eof = Vec::new();
        ::bgzf::Compressor::append_eof(&mut eof);
        out.extend_from_slice(&eof);
    }
    out
}

/// Decompress with flate2's multi-member gzip decoder.
pub fn gunzip(compressed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(compressed).read_to_end(&mut out).expect("valid gzip");
    out
}

/// The total size of every member in a well-formed BGZF stream, in order.
pub fn member_sizes(compressed: &[u8]) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut offset = 0;
    while offset < compressed.len() {
        let header: &[u8; bgzf::BGZF_HEADER_SIZE] = compressed[offset..offset + bgzf::BGZF_HEADER_SIZE]
            .try_into()
            .expect("full header");
        let total = bgzf::parse_header(header).expect("valid header") + bgzf::MEMBER_OVERHEAD;
        sizes.push(total);
        offset += total;
    }
    assert_eq!(offset, compressed.len(), "stream ends mid-member");
    sizes
}

/// Decompress `compressed` through a pipeline reader.
pub fn read_all(pipeline: &Pipeline, compressed: Vec<u8>) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    pipeline.reader(io::Cursor::new(compressed)).read_to_end(&mut out)?;
    Ok(out)
}

/// A cloneable in-memory sink whose contents can be inspected while a writer owns it.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink that accepts `limit` bytes and then fails every write.
pub struct FailingSink {
    pub written: usize,
    pub limit: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() > self.limit {
            return Err(io::Error::other("disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A source that returns short reads of random length and pauses a random time before
/// each, so blocks reach the workers at uneven intervals.
pub struct JitterReader<R> {
    inner: R,
    rng: StdRng,
    max_read: usize,
    max_pause: Duration,
}

impl<R: Read> JitterReader<R> {
    pub fn new(inner: R, seed: u64, max_read: usize, max_pause: Duration) -> Self {
        Self { inner, rng: StdRng::seed_from_u64(seed), max_read, max_pause }
    }
}

impl<R: Read> Read for JitterReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pause = self.rng.gen_range(0..=self.max_pause.as_micros() as u64);
        thread::sleep(Duration::from_micros(pause));
        let len = self.rng.gen_range(1..=self.max_read).min(buf.len());
        self.inner.read(&mut buf[..len])
    }
}
