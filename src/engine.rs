//! Inflate and deflate engines that turn blocks into BGZF members and back.
//!
//! Each engine wraps one libdeflate working state. The state is not shared: an engine is
//! borrowed from its pool for exactly one block and returned straight after.

use std::fmt;

use bytes::BytesMut;
use libdeflater::{CompressionLvl, Compressor, Decompressor};

use crate::bgzf::{
    self, BGZF_BLOCK_SIZE, BGZF_EOF, BGZF_HEADER_SIZE, MAX_BLOCK_SIZE, MEMBER_OVERHEAD,
};
use crate::block::{InputBlock, OutputBlock};
use crate::error::{BgzfError, Result};
use crate::pool::Reusable;

/// Largest chunk a single `compress` call accepts: at most two members' worth.
pub const MAX_CHUNK_SIZE: usize = 2 * BGZF_BLOCK_SIZE;

/// A deflate compression level between 0 (store) and 9 (smallest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    /// Validate a compression level.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::InvalidCompressionLevel`] if `level` is greater than 9.
    pub fn new(level: u8) -> Result<Self> {
        if level > 9 {
            return Err(BgzfError::InvalidCompressionLevel(level));
        }
        Ok(Self(level))
    }

    /// The numeric level.
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(5)
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compressed and uncompressed byte counts of one framed member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSizes {
    /// Total member size including header and trailer.
    pub compressed: usize,
    /// Uncompressed bytes carried by the member.
    pub uncompressed: usize,
}

/// What one `compress` call produced: one member, or two when one would not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushInfo {
    /// The first (usually only) member.
    pub first: MemberSizes,
    /// The second member, present only when the chunk had to be split.
    pub second: Option<MemberSizes>,
}

impl FlushInfo {
    /// Number of members produced: 1 or 2.
    #[must_use]
    pub fn blocks(&self) -> usize {
        if self.second.is_some() { 2 } else { 1 }
    }

    /// Total bytes written across all members.
    #[must_use]
    pub fn compressed_size(&self) -> usize {
        self.first.compressed + self.second.map_or(0, |s| s.compressed)
    }

    /// Total uncompressed bytes across all members.
    #[must_use]
    pub fn uncompressed_size(&self) -> usize {
        self.first.uncompressed + self.second.map_or(0, |s| s.uncompressed)
    }

    /// Per-member sizes in write order.
    pub fn members(&self) -> impl Iterator<Item = MemberSizes> {
        std::iter::once(self.first).chain(self.second)
    }
}

/// A reusable raw-inflate state.
pub struct DecompressionEngine {
    decompressor: Decompressor,
}

impl Default for DecompressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecompressionEngine {
    /// Allocate a new inflate state.
    #[must_use]
    pub fn new() -> Self {
        Self { decompressor: Decompressor::new() }
    }

    /// Inflate `input`'s payload into `output`, expecting exactly the declared size.
    ///
    /// The CRC is not checked here; see the decompression dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::InflateError`] if the payload is not valid deflate data or
    /// does not inflate to the declared number of bytes.
    pub fn decompress(&mut self, input: &InputBlock, output: &mut OutputBlock) -> Result<()> {
        let key = input.key();
        let expected = input.uncompressed_size();
        let inflate_error = |reason: String| BgzfError::InflateError {
            stream_id: key.stream_id,
            block_id: key.block_id,
            reason,
        };

        let out = output.prepare(expected);
        if input.payload_size() == 0 {
            return if expected == 0 {
                Ok(())
            } else {
                Err(inflate_error(format!("empty payload declares {expected} bytes")))
            };
        }

        match self.decompressor.deflate_decompress(input.payload(), out) {
            Ok(n) if n == expected => Ok(()),
            Ok(n) => Err(inflate_error(format!("produced {n} bytes, expected {expected}"))),
            Err(e) => Err(inflate_error(format!("{e:?}"))),
        }
    }
}

impl Reusable for DecompressionEngine {
    fn reset(&mut self) {}
}

/// A reusable raw-deflate state that emits framed BGZF members.
pub struct CompressionEngine {
    compressor: Compressor,
    level: CompressionLevel,
}

impl CompressionEngine {
    /// Allocate a new deflate state at `level`.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::InvalidCompressionLevel`] if libdeflate rejects the level.
    pub fn new(level: CompressionLevel) -> Result<Self> {
        let lvl = CompressionLvl::new(i32::from(level.get()))
            .map_err(|_| BgzfError::InvalidCompressionLevel(level.get()))?;
        Ok(Self { compressor: Compressor::new(lvl), level })
    }

    /// The level this engine compresses at.
    #[must_use]
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Compress `input` into framed members appended to `out`.
    ///
    /// One member is produced when it fits under the 64KiB member ceiling; otherwise the
    /// chunk is split in half and two members are produced. An empty chunk produces the
    /// canonical EOF member.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::DeflateError`] if `input` is larger than [`MAX_CHUNK_SIZE`] or a
    /// half still does not fit in one member.
    pub fn compress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<FlushInfo> {
        if input.is_empty() {
            return Ok(Self::eof_member(out));
        }
        if input.len() > MAX_CHUNK_SIZE {
            return Err(BgzfError::DeflateError(format!(
                "chunk of {} bytes exceeds the maximum of {MAX_CHUNK_SIZE}",
                input.len()
            )));
        }

        if input.len() <= bgzf::MAX_UNCOMPRESSED_SIZE {
            if let Some(sizes) = self.compress_member(input, out)? {
                return Ok(FlushInfo { first: sizes, second: None });
            }
        }

        let (head, tail) = input.split_at(input.len() / 2);
        let first = self.compress_member(head, out)?;
        let second = self.compress_member(tail, out)?;
        match (first, second) {
            (Some(first), Some(second)) => Ok(FlushInfo { first, second: Some(second) }),
            _ => Err(BgzfError::DeflateError(format!(
                "{} bytes at level {} do not fit in two members",
                input.len(),
                self.level
            ))),
        }
    }

    /// Append the canonical EOF member to `out`.
    pub fn eof_member(out: &mut BytesMut) -> FlushInfo {
        out.extend_from_slice(&BGZF_EOF);
        FlushInfo { first: MemberSizes { compressed: BGZF_EOF.len(), uncompressed: 0 }, second: None }
    }

    /// Frame one member; `None` if the deflated payload would not fit in a member.
    fn compress_member(&mut self, input: &[u8], out: &mut BytesMut) -> Result<Option<MemberSizes>> {
        let start = out.len();
        out.resize(start + MAX_BLOCK_SIZE, 0);

        let payload_start = start + BGZF_HEADER_SIZE;
        let payload_end = start + MAX_BLOCK_SIZE - bgzf::BGZF_FOOTER_SIZE;
        let Ok(payload_len) =
            self.compressor.deflate_compress(input, &mut out[payload_start..payload_end])
        else {
            out.truncate(start);
            return Ok(None);
        };

        let total = MEMBER_OVERHEAD + payload_len;
        let mut header = &mut out[start..payload_start];
        bgzf::write_header(&mut header)?;
        let trailer_start = payload_start + payload_len;
        let mut trailer = &mut out[trailer_start..trailer_start + bgzf::BGZF_FOOTER_SIZE];
        #[allow(clippy::cast_possible_truncation)]
        bgzf::write_trailer(&mut trailer, crc32fast::hash(input), input.len() as u32)?;
        bgzf::patch_block_size(&mut out[start..], total)?;
        out.truncate(start + total);

        Ok(Some(MemberSizes { compressed: total, uncompressed: input.len() }))
    }
}

impl Reusable for CompressionEngine {
    fn reset(&mut self) {}
}
