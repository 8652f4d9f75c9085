//! Stream-style decompression.
//!
//! A [`BgzfReader`] hands its byte source to the pipeline: workers pull members off the
//! source, inflate them in parallel, and the reader receives the decompressed blocks in
//! their original order. Blocks come back either whole, through
//! [`read_block`](BgzfReader::read_block), or as plain bytes through [`Read`] and
//! [`BufRead`].

use std::io::{self, BufRead, BufReader, Read, Write};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender};
use parking_lot::Mutex;

use crate::bgzf::MAX_BLOCK_SIZE;
use crate::block::{InputBlock, OutputBlock};
use crate::dispatch::Job;
use crate::error::BgzfError;
use crate::pipeline::{Context, Pipeline};
use crate::pool::{Pool, Pooled};

/// What the reassembly queue releases to a reader, in block-id order.
pub(crate) enum Delivery {
    /// A decompressed block.
    Block(Pooled<OutputBlock>),
    /// The source ended cleanly after the previous block.
    End,
    /// The block at this position could not be produced; nothing follows it.
    Failed(Arc<BgzfError>),
}

/// The byte source of a reader and the id of the next member to be read from it.
pub(crate) struct Source {
    pub(crate) reader: BufReader<Box<dyn Read + Send>>,
    pub(crate) next_block_id: u64,
}

impl Source {
    /// True if the source has no more bytes. Never consumes anything.
    pub(crate) fn at_end(&mut self) -> io::Result<bool> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.is_empty()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reader state shared with the workers.
pub(crate) struct ReadStream {
    pub(crate) id: u32,
    /// Only one worker reads from the source at a time; others skip it with `try_lock`.
    pub(crate) source: Mutex<Source>,
    pub(crate) inputs: Pool<InputBlock>,
    pub(crate) outputs: Pool<OutputBlock>,
    pub(crate) deliveries: Sender<Delivery>,
    /// No more members will be read: the source ended or failed.
    pub(crate) exhausted: AtomicBool,
    /// The reader was dropped; in-flight work is discarded.
    pub(crate) closed: AtomicBool,
    /// A read job for this stream is queued and not yet started.
    pub(crate) read_pending: AtomicBool,
}

impl ReadStream {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True once nothing more should be read from the source.
    pub(crate) fn is_done(&self) -> bool {
        self.exhausted.load(Ordering::Acquire) || self.is_closed()
    }

    /// True if a read could take both an input and an output block right now.
    pub(crate) fn has_free_blocks(&self) -> bool {
        self.inputs.available() > 0 && self.outputs.available() > 0
    }

    /// Queue a read job unless one is already waiting.
    pub(crate) fn schedule_read(self: &Arc<Self>, context: &Context) {
        if !self.is_done() && !self.read_pending.swap(true, Ordering::AcqRel) {
            context.submit(Job::Read(Arc::clone(self)));
        }
    }
}

/// A decompressing reader running on a [`Pipeline`].
///
/// Decompressed data is produced in source order regardless of which worker inflated
/// each block. After an error every later call returns the same error.
pub struct BgzfReader<'p> {
    context: Arc<Context>,
    stream: Arc<ReadStream>,
    deliveries: Receiver<Delivery>,
    current: Option<Pooled<OutputBlock>>,
    position: usize,
    copy_through: Option<Box<dyn Write + Send>>,
    error: Option<Arc<BgzfError>>,
    done: bool,
    _pipeline: PhantomData<&'p Pipeline>,
}

impl BgzfReader<'_> {
    pub(crate) fn open(
        context: Arc<Context>,
        source: Box<dyn Read + Send>,
        copy_through: Option<Box<dyn Write + Send>>,
    ) -> Self {
        let id = context.next_stream_id();
        let blocks = context.config.blocks_per_stream;
        let (deliveries, receiver) = flume::unbounded();
        let stream = Arc::new(ReadStream {
            id,
            source: Mutex::new(Source {
                reader: BufReader::with_capacity(MAX_BLOCK_SIZE, source),
                next_block_id: 0,
            }),
            inputs: Pool::new("input blocks", blocks, InputBlock::new),
            outputs: Pool::new("output blocks", blocks, OutputBlock::new),
            deliveries,
            exhausted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            read_pending: AtomicBool::new(false),
        });
        // A read that ran out of blocks resumes when one comes back.
        let resume = {
            let stream = Arc::downgrade(&stream);
            let context = Arc::downgrade(&context);
            move || {
                if let (Some(stream), Some(context)) = (stream.upgrade(), context.upgrade()) {
                    stream.schedule_read(&context);
                }
            }
        };
        stream.inputs.set_return_hook(resume.clone());
        stream.outputs.set_return_hook(resume);
        log::debug!("Opened BGZF reader stream {id} with {blocks} blocks");
        stream.schedule_read(&context);

        Self {
            context,
            stream,
            deliveries: receiver,
            current: None,
            position: 0,
            copy_through,
            error: None,
            done: false,
            _pipeline: PhantomData,
        }
    }

    /// The id of this reader's stream within the pipeline.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        self.stream.id
    }

    /// Take the next decompressed block, waiting for it if necessary.
    ///
    /// Returns `Ok(None)` once the source is exhausted. The block goes back to the
    /// reader's pool when the returned handle is dropped; a caller holding every block of
    /// the pool stops the stream until one is released.
    ///
    /// # Errors
    ///
    /// Returns the first error of the stream, wrapped as an `io::Error`; the original is
    /// available through [`BgzfError::from_io_error`].
    pub fn read_block(&mut self) -> io::Result<Option<Pooled<OutputBlock>>> {
        if let Some(error) = &self.error {
            return Err(BgzfError::into_io_error(Arc::clone(error)));
        }
        if self.done {
            return Ok(None);
        }

        let delivery = self.deliveries.recv().unwrap_or_else(|_| {
            Delivery::Failed(Arc::new(BgzfError::Io(io::Error::other("BGZF pipeline stopped"))))
        });
        match delivery {
            Delivery::Block(block) => {
                log::trace!(
                    "Stream {} delivered block {} ({} bytes)",
                    block.stream_id(),
                    block.block_id(),
                    block.len()
                );
                if let Some(copy) = self.copy_through.as_mut() {
                    if let Err(e) = copy.write_all(block.data()) {
                        return Err(self.fail(BgzfError::Io(e)));
                    }
                }
                if block.is_final() {
                    self.finish()?;
                }
                Ok(Some(block))
            }
            Delivery::End => {
                self.finish()?;
                Ok(None)
            }
            Delivery::Failed(error) => {
                self.error = Some(Arc::clone(&error));
                Err(BgzfError::into_io_error(error))
            }
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        self.done = true;
        log::debug!("Reached end of BGZF reader stream {}", self.stream.id);
        if let Some(copy) = self.copy_through.as_mut() {
            if let Err(e) = copy.flush() {
                return Err(self.fail(BgzfError::Io(e)));
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: BgzfError) -> io::Error {
        let error = Arc::new(error);
        self.error = Some(Arc::clone(&error));
        BgzfError::into_io_error(error)
    }
}

impl Read for BgzfReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for BgzfReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.current.as_ref().is_none_or(|block| self.position >= block.len()) {
            self.current = None;
            self.position = 0;
            match self.read_block()? {
                Some(block) => self.current = Some(block),
                None => return Ok(&[]),
            }
        }
        Ok(self.current.as_ref().map_or(&[][..], |block| &block.data()[self.position..]))
    }

    fn consume(&mut self, amt: usize) {
        self.position += amt;
    }
}

impl Drop for BgzfReader<'_> {
    fn drop(&mut self) {
        self.current = None;
        {
            // Closing under the queue lock means no decompressor can add to this stream's
            // lane after it is removed.
            let mut queue = self.context.reassembly.lock();
            self.stream.closed.store(true, Ordering::Release);
            queue.remove_stream(self.stream.id);
        }
        self.deliveries.drain().for_each(drop);
        log::debug!("Closed BGZF reader stream {}", self.stream.id);
    }
}
