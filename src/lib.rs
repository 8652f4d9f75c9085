#![deny(unsafe_code)]

//! Parallel BGZF compression and decompression on a shared pool of worker threads.
//!
//! BGZF is a sequence of independent gzip members, each holding at most 64KiB of
//! uncompressed data. Because members are independent they can be inflated and deflated
//! in parallel; the hard part is putting them back in order. This crate runs that work on
//! one [`Pipeline`] of worker threads shared by any number of streams:
//!
//! - [`BgzfReader`] reads members from a byte source, decompresses them on the workers and
//!   yields the data in source order, either block by block or through
//!   [`std::io::Read`].
//! - [`BgzfWriter`] implements [`std::io::Write`], compresses 64KiB chunks on the workers
//!   and writes the members to its sink in order, ending with the canonical EOF member.
//!
//! Blocks, engines and chunks all come from fixed-size pools, so memory use is bounded by
//! configuration rather than by input size.
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//! use pooled_bgzf::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new().threads(4).build().unwrap();
//!
//! let data: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
//! let mut writer = pipeline.writer(Vec::new());
//! writer.write_all(&data).unwrap();
//! let compressed = writer.finish().unwrap();
//!
//! let mut reader = pipeline.reader(std::io::Cursor::new(compressed));
//! let mut roundtrip = Vec::new();
//! reader.read_to_end(&mut roundtrip).unwrap();
//! assert_eq!(roundtrip, data);
//! ```

pub mod bgzf;
pub mod block;
pub mod diagnostics;
mod dispatch;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod reader;
pub mod reorder;
pub mod writer;

pub use bgzf::{BGZF_BLOCK_SIZE, BGZF_EOF, MAX_BLOCK_SIZE};
pub use block::{BlockKey, InputBlock, OutputBlock};
pub use diagnostics::{DiagnosticSink, LogSink};
pub use engine::{CompressionEngine, CompressionLevel, DecompressionEngine, FlushInfo};
pub use error::{BgzfError, Result};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig};
pub use pool::{Pool, Pooled, Reusable};
pub use reader::BgzfReader;
pub use reorder::ReorderQueue;
pub use writer::BgzfWriter;
