//! The BGZF member layout: header and trailer coding plus the wire constants.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                               │
//! │  - Magic: 0x1f 0x8b, CM: 0x08, FLG: 0x04 (FEXTRA)               │
//! │  - MTIME: 0, XFL: 0, OS: 0xff                                   │
//! │  - XLEN: 6                                                      │
//! │  - Subfield: "BC" + SLEN(2) + BSIZE(2)                          │
//! │    where BSIZE = total_block_size - 1                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Compressed data (raw deflate, BSIZE - 25 bytes)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Trailer (8 bytes)                                               │
//! │  - CRC32 of the uncompressed data                               │
//! │  - ISIZE: uncompressed size                                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::io::{self, Read, Write};

use crate::error::{BgzfError, Result};

/// Size of the BGZF member header.
pub const BGZF_HEADER_SIZE: usize = 18;

/// Size of the BGZF member trailer (CRC32 + ISIZE).
pub const BGZF_FOOTER_SIZE: usize = 8;

/// Header plus trailer bytes carried by every member.
pub const MEMBER_OVERHEAD: usize = BGZF_HEADER_SIZE + BGZF_FOOTER_SIZE;

/// Largest total member size (header + payload + trailer) that BSIZE can describe.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Largest uncompressed payload a single member may declare.
pub const MAX_UNCOMPRESSED_SIZE: usize = 64 * 1024;

/// Uncompressed bytes the writer places in one member, leaving slack for incompressible data.
pub const BGZF_BLOCK_SIZE: usize = 65280;

/// The canonical empty member that terminates a BGZF stream.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The fixed header with BSIZE (bytes 16-17) left as a placeholder.
const HEADER_TEMPLATE: [u8; BGZF_HEADER_SIZE] = [
    0x1f, 0x8b, // ID1, ID2
    0x08, // CM
    0x04, // FLG
    0x00, 0x00, 0x00, 0x00, // MTIME
    0x00, // XFL
    0xff, // OS
    0x06, 0x00, // XLEN
    b'B', b'C', // SI1, SI2
    0x02, 0x00, // SLEN
    0x00, 0x00, // BSIZE
];

/// Read exactly 18 header bytes and return the payload size declared by BSIZE.
///
/// # Errors
///
/// Returns [`BgzfError::TruncatedStream`] if the source ends before 18 bytes were read,
/// and [`BgzfError::MalformedHeader`] if the bytes do not match the BGZF template.
pub fn read_header<R: Read + ?Sized>(source: &mut R) -> Result<usize> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    read_field(source, &mut header, "header")?;
    parse_header(&header)
}

/// Validate a header and return the payload size declared by BSIZE.
///
/// # Errors
///
/// Returns [`BgzfError::MalformedHeader`] if any fixed field is wrong or BSIZE is too small
/// to hold a header and trailer.
pub fn parse_header(header: &[u8; BGZF_HEADER_SIZE]) -> Result<usize> {
    if header[0] != 0x1f || header[1] != 0x8b {
        return Err(BgzfError::MalformedHeader(format!(
            "invalid magic: expected 0x1f 0x8b, got 0x{:02x} 0x{:02x}",
            header[0], header[1]
        )));
    }
    if header[2] != 0x08 {
        return Err(BgzfError::MalformedHeader(format!(
            "invalid compression method: expected 0x08, got 0x{:02x}",
            header[2]
        )));
    }
    if header[3] != 0x04 {
        return Err(BgzfError::MalformedHeader(format!(
            "invalid flags: expected 0x04, got 0x{:02x}",
            header[3]
        )));
    }
    let xlen = u16::from_le_bytes([header[10], header[11]]);
    if xlen != 6 {
        return Err(BgzfError::MalformedHeader(format!("invalid XLEN: expected 6, got {xlen}")));
    }
    if header[12] != b'B' || header[13] != b'C' {
        return Err(BgzfError::MalformedHeader(format!(
            "invalid subfield ID: expected 'BC', got '{}{}'",
            header[12] as char, header[13] as char
        )));
    }
    let slen = u16::from_le_bytes([header[14], header[15]]);
    if slen != 2 {
        return Err(BgzfError::MalformedHeader(format!("invalid SLEN: expected 2, got {slen}")));
    }

    let block_size = usize::from(u16::from_le_bytes([header[16], header[17]])) + 1;
    if block_size < MEMBER_OVERHEAD {
        return Err(BgzfError::MalformedHeader(format!(
            "block size {block_size} is smaller than the {MEMBER_OVERHEAD} byte header and trailer"
        )));
    }
    Ok(block_size - MEMBER_OVERHEAD)
}

/// Write the fixed header with a zero BSIZE placeholder.
///
/// The placeholder is patched with [`patch_block_size`] once the payload is known.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn write_header<W: Write + ?Sized>(sink: &mut W) -> io::Result<()> {
    sink.write_all(&HEADER_TEMPLATE)
}

/// Overwrite BSIZE in a member whose header sits at the start of `member`.
///
/// # Errors
///
/// Returns [`BgzfError::OversizedBlock`] if `total_size` cannot be described by BSIZE.
pub fn patch_block_size(member: &mut [u8], total_size: usize) -> Result<()> {
    if !(MEMBER_OVERHEAD..=MAX_BLOCK_SIZE).contains(&total_size) {
        return Err(BgzfError::OversizedBlock { size: total_size, max: MAX_BLOCK_SIZE });
    }
    #[allow(clippy::cast_possible_truncation)]
    let bsize = (total_size - 1) as u16;
    member[16..18].copy_from_slice(&bsize.to_le_bytes());
    Ok(())
}

/// Append the trailer: CRC32 then uncompressed size, both little endian.
///
/// # Errors
///
/// Returns an error if the sink fails.
pub fn write_trailer<W: Write + ?Sized>(
    sink: &mut W,
    crc32: u32,
    uncompressed_size: u32,
) -> io::Result<()> {
    sink.write_all(&crc32.to_le_bytes())?;
    sink.write_all(&uncompressed_size.to_le_bytes())
}

/// Read the 8 byte trailer, returning `(crc32, uncompressed_size)`.
///
/// # Errors
///
/// Returns [`BgzfError::TruncatedStream`] if fewer than 8 bytes remain.
pub fn read_trailer<R: Read + ?Sized>(source: &mut R) -> Result<(u32, u32)> {
    let mut trailer = [0u8; BGZF_FOOTER_SIZE];
    read_field(source, &mut trailer, "trailer")?;
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    Ok((crc, size))
}

/// Fill `buf` completely, reporting how much arrived if the source ends early.
///
/// Interrupted reads are retried.
///
/// # Errors
///
/// Returns [`BgzfError::TruncatedStream`] naming `field` if the source ends early.
pub fn read_field<R: Read + ?Sized>(
    source: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(BgzfError::TruncatedStream { field, expected: buf.len(), found: filled });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(BgzfError::Io(e)),
        }
    }
    Ok(())
}
