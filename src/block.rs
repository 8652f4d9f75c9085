//! Blocks carried between pipeline stages.
//!
//! An [`InputBlock`] holds one compressed member as read from a source; an [`OutputBlock`]
//! holds its decompressed bytes. Both are pooled and carry a [`BlockKey`] naming their
//! position in the stream they came from.

use std::cmp::Ordering;
use std::io::Read;

use crate::bgzf::{self, MAX_BLOCK_SIZE, MAX_UNCOMPRESSED_SIZE};
use crate::error::{BgzfError, Result};
use crate::pool::Reusable;

/// Position of a block: the stream it belongs to and its sequence number in that stream.
///
/// Keys order by block id first and break ties on stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockKey {
    /// Logical stream the block belongs to.
    pub stream_id: u32,
    /// Sequence number within the stream, starting at 0 with no gaps.
    pub block_id: u64,
}

impl BlockKey {
    /// Create a key.
    #[must_use]
    pub fn new(stream_id: u32, block_id: u64) -> Self {
        Self { stream_id, block_id }
    }
}

impl Ord for BlockKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.block_id.cmp(&other.block_id).then(self.stream_id.cmp(&other.stream_id))
    }
}

impl PartialOrd for BlockKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One compressed member read from a byte source.
#[derive(Debug)]
pub struct InputBlock {
    payload: Vec<u8>,
    payload_size: usize,
    uncompressed_size: usize,
    crc32: u32,
    key: BlockKey,
    is_final: bool,
}

impl Default for InputBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBlock {
    /// Create an empty block with room for the largest possible payload.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payload: vec![0; MAX_BLOCK_SIZE],
            payload_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            key: BlockKey::default(),
            is_final: false,
        }
    }

    /// Read the next member (header, payload and trailer) from `source` into this block.
    ///
    /// The caller is expected to have checked that the source is not at a clean end of
    /// data; any shortfall here is a truncated member.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::MalformedHeader`] or [`BgzfError::TruncatedStream`] for bad or
    /// short members, and [`BgzfError::OversizedBlock`] if the trailer declares more than
    /// 64KiB of uncompressed data.
    pub fn read_member<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        let payload_size = bgzf::read_header(source)?;
        bgzf::read_field(source, &mut self.payload[..payload_size], "payload")?;
        let (crc32, uncompressed_size) = bgzf::read_trailer(source)?;

        let uncompressed_size = uncompressed_size as usize;
        if uncompressed_size > MAX_UNCOMPRESSED_SIZE {
            return Err(BgzfError::OversizedBlock {
                size: uncompressed_size,
                max: MAX_UNCOMPRESSED_SIZE,
            });
        }

        self.payload_size = payload_size;
        self.uncompressed_size = uncompressed_size;
        self.crc32 = crc32;
        Ok(())
    }

    /// The compressed payload (raw deflate data).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_size]
    }

    /// Declared payload size from BSIZE.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Declared uncompressed size from the trailer.
    #[must_use]
    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    /// Declared CRC32 from the trailer.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// The ordering key assigned when the block was read.
    #[must_use]
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Assign the ordering key.
    pub fn set_key(&mut self, key: BlockKey) {
        self.key = key;
    }

    /// True iff this is the terminal EOF member of its stream.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Mark this block as the terminal member.
    pub fn set_final(&mut self, is_final: bool) {
        self.is_final = is_final;
    }
}

impl Reusable for InputBlock {
    fn reset(&mut self) {
        self.payload_size = 0;
        self.uncompressed_size = 0;
        self.crc32 = 0;
        self.key = BlockKey::default();
        self.is_final = false;
    }
}

/// The decompressed bytes of one member.
#[derive(Debug)]
pub struct OutputBlock {
    buffer: Vec<u8>,
    len: usize,
    key: BlockKey,
    is_final: bool,
}

impl Default for OutputBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBlock {
    /// Create an empty block with room for the largest possible payload.
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: vec![0; MAX_UNCOMPRESSED_SIZE], len: 0, key: BlockKey::default(), is_final: false }
    }

    /// The decompressed data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Number of decompressed bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the block holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// CRC32 of the decompressed data.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        crc32fast::hash(self.data())
    }

    /// Space to decompress `len` bytes into; the block's length becomes `len`.
    ///
    /// `len` is bounded by [`MAX_UNCOMPRESSED_SIZE`], which every input block enforces.
    pub fn prepare(&mut self, len: usize) -> &mut [u8] {
        debug_assert!(len <= MAX_UNCOMPRESSED_SIZE, "output block cannot hold {len} bytes");
        self.len = len;
        &mut self.buffer[..len]
    }

    /// The ordering key copied from the input block.
    #[must_use]
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Stream this block belongs to.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        self.key.stream_id
    }

    /// Sequence number of this block within its stream.
    #[must_use]
    pub fn block_id(&self) -> u64 {
        self.key.block_id
    }

    /// True iff this block came from the terminal EOF member.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Copy key and final flag from the input block that produced this one.
    pub fn inherit(&mut self, input: &InputBlock) {
        self.key = input.key();
        self.is_final = input.is_final();
    }
}

impl Reusable for OutputBlock {
    fn reset(&mut self) {
        self.len = 0;
        self.key = BlockKey::default();
        self.is_final = false;
    }
}
