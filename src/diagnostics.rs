//! Reporting of fatal block errors from worker threads.
//!
//! The pipeline hands every report to its [`DiagnosticSink`] while holding one shared
//! lock, so messages from concurrent workers never interleave.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::BlockKey;
use crate::error::BgzfError;

/// Destination for fatal block errors.
pub trait DiagnosticSink: Send + Sync {
    /// Record that the block at `key` failed with `error`.
    fn report(&self, key: BlockKey, error: &BgzfError);
}

/// Sink that forwards reports to the `log` facade at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, key: BlockKey, error: &BgzfError) {
        log::error!("stream {} block {}: {error}", key.stream_id, key.block_id);
    }
}

/// A sink plus the lock that serializes reports to it.
#[derive(Clone)]
pub(crate) struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    lock: Arc<Mutex<()>>,
}

impl Diagnostics {
    pub(crate) fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink, lock: Arc::new(Mutex::new(())) }
    }

    pub(crate) fn report(&self, key: BlockKey, error: &BgzfError) {
        let _guard = self.lock.lock();
        self.sink.report(key, error);
    }
}
