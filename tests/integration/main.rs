//! Integration tests for pooled-bgzf.
//!
//! These tests drive the pipeline end to end through its public reader and writer API,
//! checking output against independent encoders and decoders.

mod helpers;
mod test_compress;
mod test_decompress;
