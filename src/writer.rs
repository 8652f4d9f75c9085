//! Stream-style compression.
//!
//! A [`BgzfWriter`] buffers bytes into pooled chunks of [`BGZF_BLOCK_SIZE`] bytes. Each full
//! chunk is compressed by whichever worker picks it up, and completed members are written
//! to the sink strictly in the order the chunks were filled. The caller only blocks when
//! every chunk of the stream is already in flight.

use std::any::Any;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::bgzf::{BGZF_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::block::BlockKey;
use crate::dispatch::Job;
use crate::engine::{CompressionEngine, FlushInfo, MAX_CHUNK_SIZE};
use crate::error::BgzfError;
use crate::pipeline::{Context, Pipeline};
use crate::pool::{Pool, Pooled, Reusable};
use crate::reorder::ReorderQueue;

/// Uncompressed bytes waiting to be compressed, and the members they became.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) data: Vec<u8>,
    pub(crate) frame: BytesMut,
    pub(crate) info: Option<FlushInfo>,
    pub(crate) block_id: u64,
}

impl Chunk {
    fn new() -> Self {
        Self {
            data: Vec::with_capacity(BGZF_BLOCK_SIZE),
            // Room for the two members an incompressible chunk splits into.
            frame: BytesMut::with_capacity(2 * MAX_BLOCK_SIZE),
            info: None,
            block_id: 0,
        }
    }
}

impl Reusable for Chunk {
    fn reset(&mut self) {
        self.data.clear();
        self.frame.clear();
        self.info = None;
        self.block_id = 0;
    }
}

/// A type-erased sink that can still be handed back as its concrete type.
pub(crate) trait Sink: Write + Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<W: Write + Send + 'static> Sink for W {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A compressed chunk ready to write, or the error that stopped it.
pub(crate) type Completed = Result<Pooled<Chunk>, Arc<BgzfError>>;

/// How far the sink has got, and who is waiting for it.
#[derive(Default)]
struct Progress {
    /// Number of block ids written to the sink, in order.
    written: u64,
    error: Option<Arc<BgzfError>>,
    /// Callers waiting until `written` reaches a target.
    waiters: Vec<(u64, oneshot::Sender<Result<(), Arc<BgzfError>>>)>,
}

/// Writer state shared with the workers.
pub(crate) struct WriteStream {
    pub(crate) id: u32,
    pub(crate) chunks: Pool<Chunk>,
    /// Only one worker writes at a time; others leave the drain to it with `try_lock`.
    pub(crate) sink: Mutex<Option<Box<dyn Sink>>>,
    pub(crate) pending: Mutex<ReorderQueue<Completed>>,
    failed: AtomicBool,
    progress: Mutex<Progress>,
}

impl WriteStream {
    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Account for `written` block ids taken off the pending queue, flushing the sink and
    /// waking waiters whose target has been reached. Called with the sink locked.
    pub(crate) fn record_written(
        &self,
        sink: &mut Option<Box<dyn Sink>>,
        written: u64,
        failure: Option<Arc<BgzfError>>,
    ) {
        let mut progress = self.progress.lock();
        progress.written += written;
        if let Some(error) = failure {
            self.fail(&mut progress, error);
            return;
        }

        let total = progress.written;
        if !progress.waiters.iter().any(|(target, _)| *target <= total) {
            return;
        }
        if let Some(Err(e)) = sink.as_mut().map(|sink| sink.flush()) {
            self.fail(&mut progress, Arc::new(BgzfError::Io(e)));
            return;
        }
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut progress.waiters).into_iter().partition(|(target, _)| *target <= total);
        progress.waiters = waiting;
        for (_, waiter) in ready {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail(&self, progress: &mut Progress, error: Arc<BgzfError>) {
        self.failed.store(true, Ordering::Release);
        for (_, waiter) in progress.waiters.drain(..) {
            let _ = waiter.send(Err(Arc::clone(&error)));
        }
        if progress.error.is_none() {
            progress.error = Some(error);
        }
    }

    /// Block until `target` block ids have been written and the sink flushed.
    fn wait_for(&self, target: u64) -> Result<(), Arc<BgzfError>> {
        let receiver = {
            let mut progress = self.progress.lock();
            if let Some(error) = &progress.error {
                return Err(Arc::clone(error));
            }
            if progress.written >= target {
                None
            } else {
                let (sender, receiver) = oneshot::channel();
                progress.waiters.push((target, sender));
                Some(receiver)
            }
        };

        match receiver {
            Some(receiver) => receiver.recv().unwrap_or_else(|_| {
                Err(Arc::new(BgzfError::Io(io::Error::other("BGZF pipeline stopped"))))
            }),
            // Everything was already written; only the flush is outstanding.
            None => match self.sink.lock().as_mut().map(|sink| sink.flush()) {
                Some(Err(e)) => Err(Arc::new(BgzfError::Io(e))),
                _ => Ok(()),
            },
        }
    }

    fn error(&self) -> Option<Arc<BgzfError>> {
        self.progress.lock().error.clone()
    }
}

/// A compressing writer running on a [`Pipeline`].
///
/// Call [`finish`](Self::finish) to append the EOF member and get the sink back. A writer
/// that is dropped unfinished finishes itself and logs any error.
pub struct BgzfWriter<'p, W: Write + Send + 'static> {
    context: Arc<Context>,
    stream: Arc<WriteStream>,
    current: Option<Pooled<Chunk>>,
    next_block_id: u64,
    /// Block id of the last EOF member added; the stream is terminated while it is the
    /// last block.
    eof_block_id: Option<u64>,
    finished: bool,
    _pipeline: PhantomData<&'p Pipeline>,
    _sink: PhantomData<fn() -> W>,
}

impl<W: Write + Send + 'static> BgzfWriter<'_, W> {
    pub(crate) fn open(context: Arc<Context>, sink: W) -> Self {
        let id = context.next_stream_id();
        let blocks = context.config.blocks_per_stream;
        let sink: Box<dyn Sink> = Box::new(sink);
        let stream = Arc::new(WriteStream {
            id,
            chunks: Pool::new("chunks", blocks, Chunk::new),
            sink: Mutex::new(Some(sink)),
            pending: Mutex::new(ReorderQueue::new()),
            failed: AtomicBool::new(false),
            progress: Mutex::new(Progress::default()),
        });
        log::debug!("Opened BGZF writer stream {id} with {blocks} chunks");

        Self {
            context,
            stream,
            current: None,
            next_block_id: 0,
            eof_block_id: None,
            finished: false,
            _pipeline: PhantomData,
            _sink: PhantomData,
        }
    }

    /// The id of this writer's stream within the pipeline.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        self.stream.id
    }

    /// Compress `data` as one unit of at most [`MAX_CHUNK_SIZE`] bytes, producing one
    /// member, or two if it does not fit in one.
    ///
    /// Buffered bytes from [`write`](Write::write) are submitted first so output order
    /// matches call order.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is larger than [`MAX_CHUNK_SIZE`] or the stream has
    /// already failed.
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.check()?;
        if data.len() > MAX_CHUNK_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk of {} bytes exceeds the maximum of {MAX_CHUNK_SIZE}", data.len()),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.submit_current();
        let mut chunk = self.stream.chunks.get();
        chunk.data.extend_from_slice(data);
        self.submit(chunk);
        Ok(())
    }

    /// Append the canonical EOF member after everything written so far, and wait until it
    /// has reached the sink.
    ///
    /// Nothing is added if the stream already ends with an EOF member, so repeated calls
    /// without writes in between add one member.
    ///
    /// # Errors
    ///
    /// Returns the first error of the stream.
    pub fn add_eof_block(&mut self) -> io::Result<()> {
        self.check()?;
        self.submit_current();
        if !self.ends_with_eof() {
            let mut chunk = self.stream.chunks.get();
            let block_id = self.take_block_id();
            self.eof_block_id = Some(block_id);
            chunk.block_id = block_id;
            chunk.info = Some(CompressionEngine::eof_member(&mut chunk.frame));
            self.stream.pending.lock().enqueue(BlockKey::new(self.stream.id, block_id), Ok(chunk));
            self.context.submit(Job::Write(Arc::clone(&self.stream)));
        }
        self.wait()
    }

    /// Add the EOF member unless the stream already ends with one, flush, and return the
    /// sink.
    ///
    /// # Errors
    ///
    /// Returns the first error of the stream.
    pub fn finish(mut self) -> io::Result<W> {
        self.finished = true;
        self.add_eof_block()?;
        let sink = self.stream.sink.lock().take();
        let sink = sink.ok_or_else(|| io::Error::other("BGZF writer sink already taken"))?;
        log::debug!(
            "Finished BGZF writer stream {} after {} blocks",
            self.stream.id,
            self.next_block_id
        );
        sink.into_any()
            .downcast::<W>()
            .map(|sink| *sink)
            .map_err(|_| io::Error::other("BGZF writer sink has an unexpected type"))
    }

    fn ends_with_eof(&self) -> bool {
        self.eof_block_id.is_some_and(|block_id| block_id + 1 == self.next_block_id)
    }

    fn take_block_id(&mut self) -> u64 {
        let block_id = self.next_block_id;
        self.next_block_id += 1;
        block_id
    }

    fn submit_current(&mut self) {
        if let Some(chunk) = self.current.take() {
            if chunk.data.is_empty() {
                chunk.put();
            } else {
                self.submit(chunk);
            }
        }
    }

    fn submit(&mut self, mut chunk: Pooled<Chunk>) {
        chunk.block_id = self.take_block_id();
        log::trace!(
            "Submitting block {} of stream {} ({} bytes)",
            chunk.block_id,
            self.stream.id,
            chunk.data.len()
        );
        self.context.submit(Job::Compress { stream: Arc::clone(&self.stream), chunk });
    }

    /// Wait for everything submitted so far.
    fn wait(&self) -> io::Result<()> {
        self.stream.wait_for(self.next_block_id).map_err(BgzfError::into_io_error)
    }

    fn check(&self) -> io::Result<()> {
        match self.stream.error() {
            Some(error) => Err(BgzfError::into_io_error(error)),
            None => Ok(()),
        }
    }
}

impl<W: Write + Send + 'static> Write for BgzfWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let chunk = self.current.get_or_insert_with(|| self.stream.chunks.get());
            let n = (BGZF_BLOCK_SIZE - chunk.data.len()).min(remaining.len());
            chunk.data.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            if chunk.data.len() == BGZF_BLOCK_SIZE {
                self.submit_current();
            }
        }
        Ok(buf.len())
    }

    /// Compress any partial chunk and wait until every byte written so far has reached
    /// the sink, then flush the sink.
    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.submit_current();
        self.wait()
    }
}

impl<W: Write + Send + 'static> Drop for BgzfWriter<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.add_eof_block() {
                log::error!("Failed to finish BGZF writer stream {}: {e}", self.stream.id);
            }
        }
        log::debug!("Closed BGZF writer stream {}", self.stream.id);
    }
}
