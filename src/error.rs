//! Error types for BGZF block coding and the parallel pipeline.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for BGZF operations.
pub type Result<T> = std::result::Result<T, BgzfError>;

/// Errors raised while reading, decoding, encoding or writing BGZF members.
///
/// Format, checksum and codec errors are fatal for the stream that raised them. They are
/// never retried and never skipped, since skipping a block would desynchronize every
/// record boundary downstream of it.
#[derive(Error, Debug)]
pub enum BgzfError {
    /// The 18 header bytes do not match the fixed BGZF template.
    #[error("Malformed BGZF header: {0}")]
    MalformedHeader(String),

    /// The source ended part way through a member.
    #[error("Truncated BGZF stream: expected {expected} bytes of {field}, found {found}")]
    TruncatedStream {
        /// The member field that was cut short (header, payload or trailer).
        field: &'static str,
        /// Number of bytes the field requires.
        expected: usize,
        /// Number of bytes that were available.
        found: usize,
    },

    /// The decompressed bytes do not hash to the CRC32 declared in the trailer.
    #[error(
        "Corrupt BGZF block {block_id} in stream {stream_id}: expected CRC32 0x{expected:08x}, computed 0x{computed:08x}"
    )]
    CorruptBlock {
        /// Stream the block was read from.
        stream_id: u32,
        /// Position of the block within its stream.
        block_id: u64,
        /// CRC32 declared in the member trailer.
        expected: u32,
        /// CRC32 of the bytes actually produced.
        computed: u32,
    },

    /// The inflate codec rejected a payload or produced the wrong number of bytes.
    #[error("Failed to inflate BGZF block {block_id} in stream {stream_id}: {reason}")]
    InflateError {
        /// Stream the block was read from.
        stream_id: u32,
        /// Position of the block within its stream.
        block_id: u64,
        /// Description of the codec failure.
        reason: String,
    },

    /// The deflate codec failed to produce a member.
    #[error("Failed to deflate BGZF block: {0}")]
    DeflateError(String),

    /// A member declares more uncompressed bytes than a BGZF block may hold.
    #[error("Oversized BGZF block: {size} bytes exceeds the maximum of {max}")]
    OversizedBlock {
        /// The declared size.
        size: usize,
        /// The maximum permitted size.
        max: usize,
    },

    /// Compression level outside of 0-9.
    #[error("Invalid compression level {0}: must be between 0 and 9")]
    InvalidCompressionLevel(u8),

    /// Invalid pipeline configuration value.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidConfig {
        /// The parameter name
        parameter: &'static str,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// Error from the underlying byte source or sink.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BgzfError {
    /// The `io::ErrorKind` used when this error crosses a `Read`/`Write` boundary.
    #[must_use]
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            BgzfError::TruncatedStream { .. } => io::ErrorKind::UnexpectedEof,
            BgzfError::InvalidCompressionLevel(_) | BgzfError::InvalidConfig { .. } => {
                io::ErrorKind::InvalidInput
            }
            BgzfError::Io(e) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }

    /// Wrap a shared error in an `io::Error` that still carries the original.
    #[must_use]
    pub fn into_io_error(error: Arc<BgzfError>) -> io::Error {
        io::Error::new(error.io_kind(), error)
    }

    /// Recover the `BgzfError` carried by an `io::Error` produced by this crate.
    #[must_use]
    pub fn from_io_error(error: &io::Error) -> Option<&BgzfError> {
        error.get_ref().and_then(|inner| inner.downcast_ref::<Arc<BgzfError>>()).map(|e| &**e)
    }
}
